//! `model` defines the base of all constitutive models.
//!
//! A model maps named input variables to named output variables and, on
//! demand, their first and second partial derivatives. Concrete models
//! implement [`Model::set_value`], the forward operator; everything else
//! (variable bookkeeping, automatic differentiation, graph capture and
//! replay, derivative sparsity) is provided by the trait's default
//! methods working against the shared [`ModelBase`] state.

use super::name::VariableName;
use super::parameter::{Param, ParameterStore};
use super::store::VariableStore;
use super::variable::Var;
use super::{DerivMap, SecDerivMap, ValueMap};
use crate::base::settings::{Settings, TensorOptions};
use crate::errors::{MateriaError, Result};
use crate::jit::{EvaluationSchema, GraphFunction};
use crate::tensor::primitives::PrimitiveTensor;
use crate::tensor::Tensor;
use crate::{ad, jit};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, warn};

/// Shared handle to a model.
pub type ModelRef = Rc<RefCell<dyn Model>>;

thread_local! {
    static ASSEMBLING_NL_SYS: Cell<bool> = Cell::new(false);
}

/// Whether a nonlinear system is currently being assembled on this
/// thread.
pub fn currently_assembling_nonlinear_system() -> bool {
    ASSEMBLING_NL_SYS.with(|flag| flag.get())
}

/// Guard for a region where an implicit system is being assembled. The
/// previous value is restored on drop, even on unwinding.
pub struct AssemblingNonlinearSystem {
    prev: bool,
}

impl AssemblingNonlinearSystem {
    pub fn new(assembling: bool) -> Self {
        let prev = ASSEMBLING_NL_SYS.with(|flag| flag.replace(assembling));
        AssemblingNonlinearSystem { prev }
    }
}

impl Drop for AssemblingNonlinearSystem {
    fn drop(&mut self) {
        let prev = self.prev;
        ASSEMBLING_NL_SYS.with(|flag| flag.set(prev));
    }
}

/// Whether the derivative with respect to a variable should be
/// evaluated. The check depends on whether we are currently assembling
/// a nonlinear system.
pub fn is_dependent(name: &VariableName) -> bool {
    !currently_assembling_nonlinear_system() || name.is_solve_dependent()
}

type DerivSparsity = Vec<(VariableName, VariableName)>;
type SecDerivSparsity = Vec<(VariableName, VariableName, VariableName)>;

/// The state shared by all models.
pub struct ModelBase {
    name: String,
    input: VariableStore,
    output: VariableStore,
    parameters: ParameterStore,
    submodels: Vec<ModelRef>,
    settings: Settings,

    defines_value: bool,
    defines_dvalue: bool,
    defines_d2value: bool,
    jit: bool,

    ad_derivs: Vec<(VariableName, VariableName)>,
    ad_sec_derivs: Vec<(VariableName, VariableName, VariableName)>,
    ad_args: Vec<VariableName>,

    /// Cached graphs, indexed by the binary encoding of
    /// (out, dout, d2out) and keyed by the evaluation schema. One table
    /// for ordinary evaluation, one for nonlinear-system assembly.
    traced: Vec<BTreeMap<EvaluationSchema, GraphFunction>>,
    traced_nl_sys: Vec<BTreeMap<EvaluationSchema, GraphFunction>>,

    /// Derivative sparsity, cached per context (ordinary, in-solve).
    deriv_sparsity: [Option<DerivSparsity>; 2],
    sec_deriv_sparsity: [Option<SecDerivSparsity>; 2],

    setup_done: bool,
}

impl ModelBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, Settings::default())
    }

    pub fn with_settings(name: impl Into<String>, settings: Settings) -> Self {
        let jit = !settings.disable_jit;
        ModelBase {
            name: name.into(),
            input: VariableStore::new(),
            output: VariableStore::new(),
            parameters: ParameterStore::new(),
            submodels: Vec::new(),
            settings,
            defines_value: true,
            defines_dvalue: true,
            defines_d2value: false,
            jit,
            ad_derivs: Vec::new(),
            ad_sec_derivs: Vec::new(),
            ad_args: Vec::new(),
            traced: (0..8).map(|_| BTreeMap::new()).collect(),
            traced_nl_sys: (0..8).map(|_| BTreeMap::new()).collect(),
            deriv_sparsity: [None, None],
            sec_deriv_sparsity: [None, None],
            setup_done: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn input_store(&self) -> &VariableStore {
        &self.input
    }

    pub fn input_store_mut(&mut self) -> &mut VariableStore {
        &mut self.input
    }

    pub fn output_store(&self) -> &VariableStore {
        &self.output
    }

    pub fn output_store_mut(&mut self) -> &mut VariableStore {
        &mut self.output
    }

    pub fn parameter_store(&self) -> &ParameterStore {
        &self.parameters
    }

    pub fn parameter_store_mut(&mut self) -> &mut ParameterStore {
        &mut self.parameters
    }

    pub fn input_variable(&self, name: &VariableName) -> Result<Var> {
        self.input.get(name)
    }

    pub fn output_variable(&self, name: &VariableName) -> Result<Var> {
        self.output.get(name)
    }

    pub fn defines_values(&self) -> bool {
        self.defines_value
    }

    pub fn defines_derivatives(&self) -> bool {
        self.defines_dvalue
    }

    pub fn defines_second_derivatives(&self) -> bool {
        self.defines_d2value
    }

    pub fn set_defines(&mut self, value: bool, dvalue: bool, d2value: bool) {
        self.defines_value = value;
        self.defines_dvalue = dvalue;
        self.defines_d2value = d2value;
    }

    pub fn is_jit_enabled(&self) -> bool {
        self.jit
    }

    pub fn set_jit_enabled(&mut self, jit: bool) {
        self.jit = jit && !self.settings.disable_jit;
    }

    pub fn declare_input_variable<T: PrimitiveTensor>(
        &mut self,
        name: impl Into<VariableName>,
    ) -> Result<Var> {
        self.input.declare::<T>(name.into())
    }

    pub fn declare_input_variable_with_intmd<T: PrimitiveTensor>(
        &mut self,
        name: impl Into<VariableName>,
        intmd_sizes: &[usize],
    ) -> Result<Var> {
        self.input.declare_with_intmd::<T>(name.into(), intmd_sizes)
    }

    pub fn declare_output_variable<T: PrimitiveTensor>(
        &mut self,
        name: impl Into<VariableName>,
    ) -> Result<Var> {
        self.output.declare::<T>(name.into())
    }

    pub fn declare_output_variable_with_intmd<T: PrimitiveTensor>(
        &mut self,
        name: impl Into<VariableName>,
        intmd_sizes: &[usize],
    ) -> Result<Var> {
        self.output.declare_with_intmd::<T>(name.into(), intmd_sizes)
    }

    pub fn declare_parameter(&mut self, name: &str, value: Tensor) -> Result<Param> {
        self.parameters.declare(name, value)
    }

    pub fn declare_buffer(&mut self, name: &str, value: Tensor) -> Result<Tensor> {
        self.parameters.declare_buffer(name, value)
    }

    /// Declares a nonlinear parameter provided by `provider`'s output
    /// variable `provider_var`, injecting an input variable on the
    /// `parameters` sub-axis of this model.
    pub fn declare_nonlinear_parameter(
        &mut self,
        name: &str,
        provider: ModelRef,
        provider_var: VariableName,
    ) -> Result<Param> {
        let (type_name, intmd, base) = {
            let provider_ref = provider.borrow();
            let var = provider_ref.base().output_variable(&provider_var)?;
            (var.type_name(), var.intmd_sizes(), var.base_sizes())
        };
        let input_name = VariableName::parse(super::name::PARAMETERS).with_suffix(name);
        let var = Var::new_with_intmd(input_name.clone(), type_name, intmd, base);
        self.input.insert_variable(input_name, var.clone())?;
        self.parameters
            .declare_nonlinear(name, provider, provider_var, var)
    }

    /// Registers a model that this model may use during its evaluation.
    ///
    /// With `merge_input`, the registered model's input variables are
    /// cloned onto this model's input axis, so they are ready by the
    /// time this model is evaluated.
    pub fn register_model(&mut self, model: ModelRef, merge_input: bool) -> Result<()> {
        {
            let sub = model.borrow();
            if sub.base().name() == self.name {
                return Err(MateriaError::setup(format!(
                    "model named '{}' is trying to register itself as a sub-model",
                    self.name
                )));
            }
            if self
                .submodels
                .iter()
                .any(|m| Rc::ptr_eq(m, &model))
            {
                return Err(MateriaError::setup(format!(
                    "model named '{}' has already been registered",
                    sub.base().name()
                )));
            }
            if merge_input {
                for (_, var) in sub.base().input_store().iter() {
                    self.input.clone_variable(var);
                }
            }
        }
        self.submodels.push(model);
        Ok(())
    }

    pub fn registered_models(&self) -> &[ModelRef] {
        &self.submodels
    }

    pub fn registered_model(&self, name: &str) -> Result<ModelRef> {
        for sub in &self.submodels {
            if sub.borrow().base().name() == name {
                return Ok(Rc::clone(sub));
            }
        }
        Err(MateriaError::setup(format!(
            "there is no registered model named '{}' in '{}'",
            name, self.name
        )))
    }

    /// Requests automatic differentiation of `y` with respect to `x`.
    pub fn request_ad(&mut self, y: &Var, x: &Var) -> Result<()> {
        if !self.defines_value {
            return Err(MateriaError::setup(format!(
                "model '{}' requests automatic differentiation of first derivatives, but it \
                 does not define output values",
                self.name
            )));
        }
        self.defines_dvalue = true;
        let pair = (y.name(), x.name());
        if !self.ad_derivs.contains(&pair) {
            self.ad_derivs.push(pair);
        }
        if !self.ad_args.contains(&x.name()) {
            self.ad_args.push(x.name());
        }
        Ok(())
    }

    /// Requests automatic differentiation of the second derivative of
    /// `y` with respect to `x1` and `x2`.
    pub fn request_ad_second(&mut self, y: &Var, x1: &Var, x2: &Var) -> Result<()> {
        if !self.defines_dvalue {
            return Err(MateriaError::setup(format!(
                "model '{}' requests automatic differentiation of second derivatives, but it \
                 does not define first derivatives",
                self.name
            )));
        }
        self.defines_d2value = true;
        let triple = (y.name(), x1.name(), x2.name());
        if !self.ad_sec_derivs.contains(&triple) {
            self.ad_sec_derivs.push(triple);
        }
        if !self.ad_args.contains(&x2.name()) {
            self.ad_args.push(x2.name());
        }
        Ok(())
    }

    pub fn check_precision(&self) -> Result<()> {
        self.settings.check_precision()
    }

    pub(crate) fn setup_done(&self) -> bool {
        self.setup_done
    }

    pub(crate) fn mark_setup(&mut self) {
        self.setup_done = true;
    }

    fn context_index() -> usize {
        currently_assembling_nonlinear_system() as usize
    }

    fn sparsity(&self) -> &Option<DerivSparsity> {
        &self.deriv_sparsity[Self::context_index()]
    }

    fn sec_sparsity(&self) -> &Option<SecDerivSparsity> {
        &self.sec_deriv_sparsity[Self::context_index()]
    }

    fn cache_derivative_sparsity(&mut self) -> Result<()> {
        let mut sparsity = Vec::new();
        for (yname, yvar) in self.output.iter() {
            for (xname, _) in yvar.derivatives()? {
                sparsity.push((yname.clone(), xname));
            }
        }
        self.deriv_sparsity[Self::context_index()] = Some(sparsity);
        Ok(())
    }

    fn cache_second_derivative_sparsity(&mut self) -> Result<()> {
        let mut sparsity = Vec::new();
        for (yname, yvar) in self.output.iter() {
            for (x1, x2, _) in yvar.second_derivatives()? {
                sparsity.push((yname.clone(), x1, x2));
            }
        }
        self.sec_deriv_sparsity[Self::context_index()] = Some(sparsity);
        Ok(())
    }

    /// The parameter stack: this model's literal parameters followed by
    /// every registered model's, recursively.
    fn collect_parameter_stack(&self) -> Vec<Tensor> {
        let mut stack = self.parameters.collect_stack();
        for sub in &self.submodels {
            stack.extend(sub.borrow().base().collect_parameter_stack());
        }
        stack
    }

    fn assign_parameter_stack<I>(&self, stack: &mut I) -> Result<()>
    where
        I: Iterator<Item = Tensor>,
    {
        self.parameters.assign_stack(stack)?;
        for sub in &self.submodels {
            sub.borrow().base().assign_parameter_stack(stack)?;
        }
        Ok(())
    }

    fn calculate_eval_schema(&self) -> Result<EvaluationSchema> {
        let mut schema = EvaluationSchema::new(self.settings.dispatch_key());
        for (_, var) in self.input.iter() {
            let value = var.value()?;
            schema.push(&value);
        }
        for param in self.collect_parameter_stack() {
            schema.push(&param);
        }
        Ok(schema)
    }

    fn forward_operator_index(out: bool, dout: bool, d2out: bool) -> usize {
        (out as usize) * 4 + (dout as usize) * 2 + (d2out as usize)
    }
}

/// The base trait of all constitutive models.
pub trait Model {
    fn base(&self) -> &ModelBase;
    fn base_mut(&mut self) -> &mut ModelBase;

    /// The map between inputs and outputs, and optionally its
    /// derivatives. All concrete models must provide this.
    fn set_value(&mut self, out: bool, dout: bool, d2out: bool) -> Result<()>;

    /// Links input and output variable references across the registered
    /// models and finalizes the axes.
    fn setup(&mut self) -> Result<()> {
        if self.base().setup_done() {
            return Ok(());
        }
        self.link_input_variables()?;
        self.base_mut().input_store_mut().setup_axis()?;
        self.base_mut().output_store_mut().setup_axis()?;
        self.base_mut().mark_setup();
        Ok(())
    }

    /// Points every registered model's input variables at this model's
    /// input variables.
    fn link_input_variables(&mut self) -> Result<()> {
        let submodels = self.base().registered_models().to_vec();
        for sub in submodels {
            let sub = sub.borrow();
            for (name, var) in sub.base().input_store().iter() {
                if var.owning() {
                    var.set_reference(&self.base().input_variable(name)?)?;
                }
            }
        }
        Ok(())
    }

    /// Optional checks on sub-axis placement and option consistency.
    fn diagnose(&self) -> Result<()> {
        for sub in self.base().registered_models() {
            sub.borrow().diagnose()?;
        }
        for (name, _) in self.base().input_store().iter() {
            let ok = name.is_state()
                || name.is_old_state()
                || name.is_force()
                || name.is_old_force()
                || name.is_residual()
                || name.is_parameter();
            if !ok {
                return Err(MateriaError::setup(format!(
                    "input variable '{}' must be on one of the state, old_state, forces, \
                     old_forces, residual, parameters sub-axes",
                    name
                )));
            }
        }
        for (name, _) in self.base().output_store().iter() {
            let ok = name.is_state() || name.is_force() || name.is_residual() || name.is_parameter();
            if !ok {
                return Err(MateriaError::setup(format!(
                    "output variable '{}' must be on one of the state, forces, residual, \
                     parameters sub-axes",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Sends parameters, buffers and padding variables to the target
    /// options. This build is CPU/double only, so unsupported targets
    /// error.
    fn to(&mut self, options: &TensorOptions) -> Result<()> {
        options.check_supported()?;
        let submodels = self.base().registered_models().to_vec();
        for sub in submodels {
            sub.borrow_mut().to(options)?;
        }
        let providers: Vec<ModelRef> = self
            .base()
            .parameter_store()
            .named_nonlinear_parameters()
            .map(|(_, p)| Rc::clone(&p.provider))
            .collect();
        for provider in providers {
            provider.borrow_mut().to(options)?;
        }
        Ok(())
    }

    fn clear_input(&self) -> Result<()> {
        self.base().input_store().clear_values();
        for sub in self.base().registered_models() {
            sub.borrow().clear_input()?;
        }
        Ok(())
    }

    fn clear_output(&self) -> Result<()> {
        self.base().output_store().clear_values();
        for sub in self.base().registered_models() {
            sub.borrow().clear_output()?;
        }
        Ok(())
    }

    fn clear_derivatives(&self) -> Result<()> {
        self.base().output_store().clear_derivatives();
        for sub in self.base().registered_models() {
            sub.borrow().clear_derivatives()?;
        }
        Ok(())
    }

    fn zero_undefined_input(&self) -> Result<()> {
        self.base().input_store().zero_undefined()?;
        for sub in self.base().registered_models() {
            sub.borrow().zero_undefined_input()?;
        }
        Ok(())
    }

    /// Convenient shortcut to construct and return the model value.
    fn value(&mut self, in_: &ValueMap) -> Result<ValueMap> {
        self.forward_helper(in_, true, false, false)?;
        let values = self.collect_output()?;
        self.clear_input()?;
        self.clear_output()?;
        Ok(values)
    }

    /// Convenient shortcut to construct and return the derivative.
    fn dvalue(&mut self, in_: &ValueMap) -> Result<DerivMap> {
        self.forward_helper(in_, false, true, false)?;
        let derivs = self.collect_output_derivatives()?;
        self.clear_input()?;
        self.clear_output()?;
        Ok(derivs)
    }

    /// Convenient shortcut to construct and return the model value and
    /// its derivative.
    fn value_and_dvalue(&mut self, in_: &ValueMap) -> Result<(ValueMap, DerivMap)> {
        self.forward_helper(in_, true, true, false)?;
        let values = self.collect_output()?;
        let derivs = self.collect_output_derivatives()?;
        self.clear_input()?;
        self.clear_output()?;
        Ok((values, derivs))
    }

    /// Convenient shortcut to construct and return the model's value,
    /// first and second derivative.
    fn value_and_dvalue_and_d2value(
        &mut self,
        in_: &ValueMap,
    ) -> Result<(ValueMap, DerivMap, SecDerivMap)> {
        self.forward_helper(in_, true, true, true)?;
        let values = self.collect_output()?;
        let derivs = self.collect_output_derivatives()?;
        let sec_derivs = self.collect_output_second_derivatives()?;
        self.clear_input()?;
        self.clear_output()?;
        Ok((values, derivs, sec_derivs))
    }

    /// Convenient shortcut to construct and return the model's second
    /// derivative.
    fn d2value(&mut self, in_: &ValueMap) -> Result<SecDerivMap> {
        self.forward_helper(in_, false, false, true)?;
        let sec_derivs = self.collect_output_second_derivatives()?;
        self.clear_input()?;
        self.clear_output()?;
        Ok(sec_derivs)
    }

    /// Convenient shortcut to construct and return the model's first
    /// and second derivative.
    fn dvalue_and_d2value(&mut self, in_: &ValueMap) -> Result<(DerivMap, SecDerivMap)> {
        self.forward_helper(in_, false, true, true)?;
        let derivs = self.collect_output_derivatives()?;
        let sec_derivs = self.collect_output_second_derivatives()?;
        self.clear_input()?;
        self.clear_output()?;
        Ok((derivs, sec_derivs))
    }

    fn forward_helper(&mut self, in_: &ValueMap, out: bool, dout: bool, d2out: bool) -> Result<()> {
        self.base().check_precision()?;
        self.base().input_store().assign(in_)?;
        self.resolve_nonlinear_parameters(in_)?;
        self.zero_undefined_input()?;
        self.forward_maybe_jit(out, dout, d2out)
    }

    /// Evaluates the providers of nonlinear parameters against the
    /// current inputs and assigns their outputs to the injected
    /// `parameters.*` input variables. When both the provider and the
    /// consumer live in one composed model, the dependency resolver
    /// handles the coupling instead.
    fn resolve_nonlinear_parameters(&mut self, in_: &ValueMap) -> Result<()> {
        let nl_params: Vec<crate::model::parameter::NonlinearParameter> = self
            .base()
            .parameter_store()
            .named_nonlinear_parameters()
            .map(|(_, p)| p.clone())
            .collect();

        for nl_param in nl_params {
            let provider_inputs: ValueMap = {
                let provider = nl_param.provider.borrow();
                in_.iter()
                    .filter(|(name, _)| provider.base().input_store().has(name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect()
            };
            let outputs = nl_param.provider.borrow_mut().value(&provider_inputs)?;
            let value = outputs.get(&nl_param.provider_var).cloned().ok_or_else(|| {
                MateriaError::setup(format!(
                    "the nonlinear parameter provider did not produce '{}'",
                    nl_param.provider_var
                ))
            })?;
            nl_param.var.set(value)?;
        }

        for sub in self.base().registered_models().to_vec() {
            sub.borrow_mut().resolve_nonlinear_parameters(in_)?;
        }
        Ok(())
    }

    fn collect_output(&self) -> Result<ValueMap> {
        self.base().output_store().collect()
    }

    fn collect_output_derivatives(&self) -> Result<DerivMap> {
        let mut derivs = DerivMap::new();
        for (yname, yvar) in self.base().output_store().iter() {
            let entries = yvar.derivatives()?;
            if entries.is_empty() {
                continue;
            }
            let row = derivs.entry(yname.clone()).or_insert_with(ValueMap::new);
            for (xname, tensor) in entries {
                row.insert(xname, tensor);
            }
        }
        Ok(derivs)
    }

    fn collect_output_second_derivatives(&self) -> Result<SecDerivMap> {
        let mut sec_derivs = SecDerivMap::new();
        for (yname, yvar) in self.base().output_store().iter() {
            let entries = yvar.second_derivatives()?;
            if entries.is_empty() {
                continue;
            }
            let row = sec_derivs.entry(yname.clone()).or_insert_with(DerivMap::new);
            for (x1, x2, tensor) in entries {
                row.entry(x1).or_insert_with(ValueMap::new).insert(x2, tensor);
            }
        }
        Ok(sec_derivs)
    }

    /// Forward operator without graph capture.
    fn forward(&mut self, out: bool, dout: bool, d2out: bool) -> Result<()> {
        debug_assert!(
            self.base().defines_values() || !out,
            "Model '{}' is requested to compute output values, but it does not define them.",
            self.base().name()
        );
        debug_assert!(
            self.base().defines_derivatives() || !dout,
            "Model '{}' is requested to compute first derivatives, but it does not define them.",
            self.base().name()
        );
        debug_assert!(
            self.base().defines_second_derivatives() || !d2out,
            "Model '{}' is requested to compute second derivatives, but it does not define them.",
            self.base().name()
        );

        self.clear_output()?;

        if dout || d2out {
            self.enable_ad()?;
        }

        self.set_value(out || dout || d2out, dout, d2out)?;

        if dout || d2out {
            self.extract_ad_derivatives(dout, d2out)?;
        }

        if dout && self.base().sparsity().is_none() {
            self.base_mut().cache_derivative_sparsity()?;
        }
        if d2out && self.base().sec_sparsity().is_none() {
            self.base_mut().cache_second_derivative_sparsity()?;
        }

        Ok(())
    }

    /// Marks the variables requested for automatic differentiation as
    /// differentiation leaves.
    fn enable_ad(&mut self) -> Result<()> {
        let args = self.base().ad_args.clone();
        for name in args {
            self.base().input_variable(&name)?.requires_grad_()?;
        }
        Ok(())
    }

    /// Extracts the requested derivatives by vector-Jacobian products
    /// on the marked outputs.
    fn extract_ad_derivatives(&mut self, dout: bool, d2out: bool) -> Result<()> {
        if self.base().ad_derivs.is_empty() && self.base().ad_sec_derivs.is_empty() {
            return Ok(());
        }

        // Group first-derivative requests by output variable.
        let mut ys: Vec<VariableName> = Vec::new();
        for (y, _) in &self.base().ad_derivs {
            if !ys.contains(y) {
                ys.push(y.clone());
            }
        }

        for yname in &ys {
            let has_second = self
                .base()
                .ad_sec_derivs
                .iter()
                .any(|(y, _, _)| y == yname);
            if !dout && d2out && !has_second {
                continue;
            }

            let us: Vec<VariableName> = self
                .base()
                .ad_derivs
                .iter()
                .filter(|(y, _)| y == yname)
                .map(|(_, u)| u.clone())
                .filter(|u| is_dependent(u))
                .collect();
            if us.is_empty() {
                continue;
            }

            let yvar = self.base().output_variable(yname)?;
            let uvars: Vec<Var> = us
                .iter()
                .map(|u| self.base().input_variable(u))
                .collect::<Result<_>>()?;
            let uts: Vec<Tensor> = uvars.iter().map(|u| u.value()).collect::<Result<_>>()?;
            let ut_refs: Vec<&Tensor> = uts.iter().collect();

            let create_graph = d2out && has_second;
            let dy_dus = ad::jacrev(&yvar.value()?, &ut_refs, create_graph, true)?;

            for (uvar, dy_du) in uvars.iter().zip(dy_dus) {
                if let Some(dy_du) = dy_du {
                    yvar.d_assign(uvar, dy_du)?;
                }
            }
        }

        if d2out {
            let triples = self.base().ad_sec_derivs.clone();
            for (yname, u1name, u2name) in triples {
                if !is_dependent(&u1name) || !is_dependent(&u2name) {
                    continue;
                }
                let yvar = self.base().output_variable(&yname)?;
                let dy_du1 = match yvar.derivative_logical(&u1name) {
                    Some(t) if t.requires_grad() => t,
                    _ => continue,
                };
                let u2var = self.base().input_variable(&u2name)?;
                let u2t = u2var.value()?;
                let d2 = ad::jacrev(&dy_du1, &[&u2t], false, true)?;
                if let Some(d2) = d2.into_iter().next().flatten() {
                    let u1var = self.base().input_variable(&u1name)?;
                    yvar.d2_assign(&u1var, &u2var, d2)?;
                }
            }
        }

        Ok(())
    }

    /// The forward operator with graph capture and replay.
    ///
    /// On a cache hit the stored graph is replayed on the current input
    /// stack. On a miss a new graph is traced, stored keyed by the
    /// evaluation schema, and this method re-invokes itself so the next
    /// pass takes the fast path. A capture failure falls through to the
    /// uncaptured forward operator.
    fn forward_maybe_jit(&mut self, out: bool, dout: bool, d2out: bool) -> Result<()> {
        if !out && !dout && !d2out {
            return Ok(());
        }

        if !self.base().is_jit_enabled() || jit::tracer::is_tracing() {
            return self.forward(out, dout, d2out);
        }

        let in_solve = currently_assembling_nonlinear_system();
        let index = ModelBase::forward_operator_index(out, dout, d2out);
        let schema = self.base().calculate_eval_schema()?;

        let hit = {
            let base = self.base();
            let table = if in_solve {
                &base.traced_nl_sys
            } else {
                &base.traced
            };
            table[index].contains_key(&schema)
        };

        if hit {
            let mut stack = self.base().input_store().collect_stack()?;
            stack.extend(self.base().collect_parameter_stack());

            let outputs = {
                let base = self.base();
                let table = if in_solve {
                    &base.traced_nl_sys
                } else {
                    &base.traced
                };
                debug!(model = base.name(), "replaying captured forward operator");
                table[index][&schema].run(stack)?
            };

            if dout || d2out {
                self.clear_derivatives()?;
            }
            self.assign_output_stack(outputs, out, dout, d2out)?;
            return Ok(());
        }

        // Capture a new graph for this schema.
        let mut inputs = self.base().input_store().collect_stack()?;
        inputs.extend(self.base().collect_parameter_stack());

        debug!(model = self.base().name(), "capturing forward operator");
        let n_vars = self.base().input_store().len();
        let traced = {
            let inputs_ref = &inputs;
            jit::tracer::trace(inputs_ref, || {
                self.base()
                    .input_store()
                    .assign_stack(inputs_ref[..n_vars].iter().cloned())?;
                let mut params = inputs_ref[n_vars..].iter().cloned();
                self.base().assign_parameter_stack(&mut params)?;
                self.forward(out, dout, d2out)?;
                self.collect_output_stack(out, dout, d2out)
            })
        };

        match traced {
            Ok(graph) => {
                let base = self.base_mut();
                let table = if in_solve {
                    &mut base.traced_nl_sys
                } else {
                    &mut base.traced
                };
                table[index].insert(schema, graph);
                // Rerun, this time through the captured graph.
                self.forward_maybe_jit(out, dout, d2out)
            }
            Err(e) => {
                warn!(
                    model = self.base().name(),
                    error = %e,
                    "graph capture failed; falling back to uncaptured evaluation"
                );
                self.forward(out, dout, d2out)
            }
        }
    }

    /// Collects the output stack in the documented order: output
    /// variables in axis order, then first derivatives in sparsity
    /// order, then second derivatives likewise.
    fn collect_output_stack(&self, _out: bool, dout: bool, d2out: bool) -> Result<Vec<Tensor>> {
        let mut stack = self.base().output_store().collect_stack()?;

        if dout {
            let sparsity = self.base().sparsity().clone().ok_or_else(|| {
                MateriaError::trace("derivative sparsity has not been cached")
            })?;
            for (yname, xname) in &sparsity {
                let yvar = self.base().output_variable(yname)?;
                let entry = yvar.derivative_assembly(xname)?.ok_or_else(|| {
                    MateriaError::trace(format!(
                        "derivative d({})/d({}) vanished from the sparsity pattern",
                        yname, xname
                    ))
                })?;
                stack.push(entry);
            }
        }

        if d2out {
            let sparsity = self.base().sec_sparsity().clone().ok_or_else(|| {
                MateriaError::trace("second derivative sparsity has not been cached")
            })?;
            for (yname, x1, x2) in &sparsity {
                let yvar = self.base().output_variable(yname)?;
                let entry = yvar.second_derivative_assembly(x1, x2)?.ok_or_else(|| {
                    MateriaError::trace(format!(
                        "second derivative d2({})/d({})d({}) vanished from the sparsity pattern",
                        yname, x1, x2
                    ))
                })?;
                stack.push(entry);
            }
        }

        Ok(stack)
    }

    /// Assigns replayed outputs back into the variable store, in the
    /// same order `collect_output_stack` produced them.
    fn assign_output_stack(
        &mut self,
        outputs: Vec<Tensor>,
        _out: bool,
        dout: bool,
        d2out: bool,
    ) -> Result<()> {
        let n_out = self.base().output_store().len();
        let mut iter = outputs.into_iter();

        self.base()
            .output_store()
            .assign_stack(iter.by_ref().take(n_out))?;

        if dout {
            let sparsity = self.base().sparsity().clone().ok_or_else(|| {
                MateriaError::trace("derivative sparsity has not been cached")
            })?;
            for (yname, xname) in &sparsity {
                let entry = iter.next().ok_or_else(|| {
                    MateriaError::trace("the replayed output stack is too short")
                })?;
                let yvar = self.base().output_variable(yname)?;
                let xvar = self.base().input_variable(xname)?;
                yvar.d_set_assembly(&xvar, entry)?;
            }
        }

        if d2out {
            let sparsity = self.base().sec_sparsity().clone().ok_or_else(|| {
                MateriaError::trace("second derivative sparsity has not been cached")
            })?;
            for (yname, x1, x2) in &sparsity {
                let entry = iter.next().ok_or_else(|| {
                    MateriaError::trace("the replayed output stack is too short")
                })?;
                let yvar = self.base().output_variable(yname)?;
                let x1var = self.base().input_variable(x1)?;
                let x2var = self.base().input_variable(x2)?;
                yvar.d2_set_assembly(&x1var, &x2var, entry)?;
            }
        }

        Ok(())
    }
}

//! `variable` defines the named slots owned by models: the value, its
//! first and second partial derivatives, and the referencing (aliasing)
//! machinery used to wire composed models together.
//!
//! Variables are shared handles over reference-counted cells, the same
//! construction this crate uses everywhere a graph of mutable nodes is
//! needed. A referencing variable owns no value: value reads and writes
//! forward along the alias chain to the ultimate referent, which is
//! established once at setup. Derivatives are stored on the variable
//! object itself, so a composed model's total derivatives never clobber
//! a submodel's partials.

use super::name::VariableName;
use crate::errors::{MateriaError, Result};
use crate::tensor::assembly::{from_assembly, to_assembly};
use crate::tensor::shape::{add_shapes, is_expandable_to, normalize_dim, numel};
use crate::tensor::Tensor;
use std::cell::RefCell;
use std::rc::Rc;

/// Shape information of one derivative argument.
#[derive(Debug, Clone)]
struct ArgInfo {
    name: VariableName,
    intmd_sizes: Vec<usize>,
    base_sizes: Vec<usize>,
    dep_dims: Vec<usize>,
}

/// One (first or second) partial derivative of a variable.
///
/// Two storage forms coexist: the logical form carries the full
/// intermediate shape, the assembly form flattens each participant's
/// intermediate and base dimensions into one dense dimension. The
/// assembly form is materialized lazily and cached.
#[derive(Debug, Clone)]
struct DerivSlot {
    y_intmd: Vec<usize>,
    y_base: Vec<usize>,
    y_dep_dims: Vec<usize>,
    args: Vec<ArgInfo>,
    value: Option<Tensor>,
    assembly: Option<Tensor>,
}

impl DerivSlot {
    fn debug_name(&self, y: &VariableName) -> String {
        match self.args.len() {
            1 => format!("d({})/d({})", y, self.args[0].name),
            _ => format!("d2({})/d({})d({})", y, self.args[0].name, self.args[1].name),
        }
    }

    fn total_intmd(&self) -> Vec<usize> {
        let mut parts: Vec<&[usize]> = vec![&self.y_intmd];
        parts.extend(self.args.iter().map(|a| a.intmd_sizes.as_slice()));
        add_shapes(&parts)
    }

    fn total_base(&self) -> Vec<usize> {
        let mut parts: Vec<&[usize]> = vec![&self.y_base];
        parts.extend(self.args.iter().map(|a| a.base_sizes.as_slice()));
        add_shapes(&parts)
    }

    fn assign(&mut self, v: Tensor, y: &VariableName) -> Result<()> {
        let total_base = self.total_base();
        if v.base_sizes() != total_base.as_slice() {
            return Err(MateriaError::shape(format!(
                "the assigned derivative for '{}' has base shape {:?}, expected {:?}",
                self.debug_name(y),
                v.base_sizes(),
                total_base
            )));
        }

        let total_intmd = self.total_intmd();
        let aligned = if v.intmd_sizes() == total_intmd.as_slice() {
            v
        } else {
            if !is_expandable_to(v.intmd_sizes(), &self.y_intmd) {
                return Err(MateriaError::shape(format!(
                    "the assigned derivative for '{}' has intermediate shape {:?}; expected \
                     either the full intermediate shape {:?} or a shape expandable to the \
                     variable's intermediate shape {:?}",
                    self.debug_name(y),
                    v.intmd_sizes(),
                    total_intmd,
                    self.y_intmd
                )));
            }
            self.broadcast_intmd_dims(v, y)?
        };

        self.value = Some(match self.value.take() {
            Some(existing) => existing.add(&aligned)?,
            None => aligned,
        });
        self.assembly = None;
        Ok(())
    }

    /// Brings a value with the variable's intermediate shape to the
    /// derivative's full intermediate shape: broadcast to the dependent
    /// dimensions, diagonalize across the independent ones, and expand
    /// each argument's dependent dimensions into place.
    fn broadcast_intmd_dims(&self, v: Tensor, y: &VariableName) -> Result<Tensor> {
        let mut v2 = v.intmd_expand(&self.y_intmd)?;

        // Move the variable's dependent dims to the front.
        for (i, d) in self.y_dep_dims.iter().enumerate() {
            v2 = v2.intmd_movedim(*d as i64, i as i64)?;
        }

        // Flatten the independent dims.
        let ndep = self.y_dep_dims.len();
        let dep_sizes = v2.intmd_sizes()[..ndep].to_vec();
        let indep_sizes = v2.intmd_sizes()[ndep..].to_vec();
        let n = numel(&indep_sizes);
        v2 = v2.intmd_reshape(&add_shapes(&[&dep_sizes, &[n]]))?;

        // Diagonalize across the flattened axis, once per argument.
        for _ in 0..self.args.len() {
            v2 = v2.intmd_diagonalize(-1)?;
        }
        let arg_axes = vec![n; self.args.len()];
        v2 = v2.intmd_reshape(&add_shapes(&[&dep_sizes, &indep_sizes, &arg_axes]))?;

        // Move the variable's dependent dims back.
        for (i, d) in self.y_dep_dims.iter().enumerate().rev() {
            v2 = v2.intmd_movedim(i as i64, *d as i64)?;
        }

        // Unflatten each argument's axis into its independent dims.
        let mut arg_indep = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            let indep: Vec<usize> = arg
                .intmd_sizes
                .iter()
                .enumerate()
                .filter(|(d, _)| !arg.dep_dims.contains(d))
                .map(|(_, s)| *s)
                .collect();
            if numel(&indep) != n {
                return Err(MateriaError::shape(format!(
                    "the independent intermediate dims of argument '{}' hold {} entries, \
                     which does not match the {} independent entries of '{}'",
                    arg.name,
                    numel(&indep),
                    n,
                    self.debug_name(y)
                )));
            }
            arg_indep.push(indep);
        }
        let mut unflat: Vec<&[usize]> = vec![&self.y_intmd];
        unflat.extend(arg_indep.iter().map(|s| s.as_slice()));
        v2 = v2.intmd_reshape(&add_shapes(&unflat))?;

        // Unsqueeze and expand each argument's dependent dims into the
        // positions recorded in its declaration.
        let mut d_offset = self.y_intmd.len();
        for arg in &self.args {
            for d in &arg.dep_dims {
                v2 = v2.intmd_unsqueeze((d_offset + d) as i64)?;
                let mut sizes = v2.intmd_sizes().to_vec();
                sizes[d_offset + d] = arg.intmd_sizes[*d];
                v2 = v2.intmd_expand(&sizes)?;
            }
            d_offset += arg.intmd_sizes.len();
        }

        v2.intmd_sum_to_size(&self.total_intmd())
    }

    /// The assembly form, materialized lazily.
    fn get(&mut self, y: &VariableName) -> Result<Option<Tensor>> {
        if let Some(assembly) = &self.assembly {
            return Ok(Some(assembly.clone()));
        }
        let value = match &self.value {
            Some(value) => value,
            None => return Ok(None),
        };

        let mut intmd: Vec<&[usize]> = vec![&self.y_intmd];
        intmd.extend(self.args.iter().map(|a| a.intmd_sizes.as_slice()));
        let mut base: Vec<&[usize]> = vec![&self.y_base];
        base.extend(self.args.iter().map(|a| a.base_sizes.as_slice()));

        let assembly = to_assembly(value, &intmd, &base, &self.debug_name(y))?;
        self.assembly = Some(assembly.clone());
        Ok(Some(assembly))
    }

    /// Sets the derivative from its assembly form.
    fn set(&mut self, assembly: Tensor, y: &VariableName) -> Result<()> {
        let mut intmd: Vec<&[usize]> = vec![&self.y_intmd];
        intmd.extend(self.args.iter().map(|a| a.intmd_sizes.as_slice()));
        let mut base: Vec<&[usize]> = vec![&self.y_base];
        base.extend(self.args.iter().map(|a| a.base_sizes.as_slice()));

        self.value = Some(from_assembly(
            &assembly,
            &intmd,
            &base,
            &self.debug_name(y),
        )?);
        self.assembly = Some(assembly);
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct VariableData {
    name: VariableName,
    type_name: &'static str,
    base_sizes: Vec<usize>,
    /// Cached intermediate shape this variable last saw. Assignment is
    /// the only thing that updates it; clearing does not invalidate it.
    intmd_sizes: Vec<usize>,
    value: Option<Tensor>,
    derivs: Vec<DerivSlot>,
    sec_derivs: Vec<DerivSlot>,
    reference: Option<Var>,
}

/// A shared handle to a variable.
#[derive(Clone, Debug)]
pub struct Var(Rc<RefCell<VariableData>>);

impl Var {
    pub(crate) fn new(name: VariableName, type_name: &'static str, base_sizes: Vec<usize>) -> Var {
        Var(Rc::new(RefCell::new(VariableData {
            name,
            type_name,
            base_sizes,
            intmd_sizes: Vec::new(),
            value: None,
            derivs: Vec::new(),
            sec_derivs: Vec::new(),
            reference: None,
        })))
    }

    pub(crate) fn new_with_intmd(
        name: VariableName,
        type_name: &'static str,
        intmd_sizes: Vec<usize>,
        base_sizes: Vec<usize>,
    ) -> Var {
        let var = Var::new(name, type_name, base_sizes);
        var.0.borrow_mut().intmd_sizes = intmd_sizes;
        var
    }

    pub fn name(&self) -> VariableName {
        self.0.borrow().name.clone()
    }

    pub fn type_name(&self) -> &'static str {
        self.0.borrow().type_name
    }

    pub fn base_sizes(&self) -> Vec<usize> {
        self.0.borrow().base_sizes.clone()
    }

    pub fn intmd_sizes(&self) -> Vec<usize> {
        self.resolve().0.borrow().intmd_sizes.clone()
    }

    /// Whether this variable stores its own value.
    pub fn owning(&self) -> bool {
        self.0.borrow().reference.is_none()
    }

    /// The ultimate referent of the alias chain.
    pub fn resolve(&self) -> Var {
        let mut current = self.clone();
        loop {
            let next = current.0.borrow().reference.clone();
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    /// Establishes the alias to another variable. A variable can only
    /// reference once.
    pub fn set_reference(&self, other: &Var) -> Result<()> {
        let mut data = self.0.borrow_mut();
        if data.reference.is_some() {
            return Err(MateriaError::setup(format!(
                "variable '{}' already references another variable",
                data.name
            )));
        }
        if other.base_sizes() != data.base_sizes {
            return Err(MateriaError::setup(format!(
                "variable '{}' (base shape {:?}) cannot reference '{}' (base shape {:?})",
                data.name,
                data.base_sizes,
                other.name(),
                other.base_sizes()
            )));
        }
        data.reference = Some(other.clone());
        Ok(())
    }

    pub fn same_slot(&self, other: &Var) -> bool {
        Rc::ptr_eq(&self.resolve().0, &other.resolve().0)
    }

    pub fn defined(&self) -> bool {
        self.resolve().0.borrow().value.is_some()
    }

    /// The variable value.
    pub fn value(&self) -> Result<Tensor> {
        let referent = self.resolve();
        let data = referent.0.borrow();
        data.value.clone().ok_or_else(|| {
            MateriaError::setup(format!("variable '{}' has no value", data.name))
        })
    }

    /// Assigns the variable value, caching the intermediate shape.
    pub fn set(&self, value: Tensor) -> Result<()> {
        {
            let data = self.0.borrow();
            if value.base_sizes() != data.base_sizes.as_slice() {
                return Err(MateriaError::shape(format!(
                    "cannot assign base shape {:?} to variable '{}' with base shape {:?}",
                    value.base_sizes(),
                    data.name,
                    data.base_sizes
                )));
            }
            if cfg!(debug_assertions)
                && !crate::jit::tracer::is_tracing()
                && !value.all_finite()
            {
                return Err(MateriaError::numerical(format!(
                    "non-finite value assigned to variable '{}'",
                    data.name
                )));
            }
        }
        let referent = self.resolve();
        let mut data = referent.0.borrow_mut();
        data.intmd_sizes = value.intmd_sizes().to_vec();
        data.value = Some(value);
        if !Rc::ptr_eq(&self.0, &referent.0) {
            self.0.borrow_mut().intmd_sizes = data.intmd_sizes.clone();
        }
        Ok(())
    }

    /// Sets the variable value to zero with the cached intermediate
    /// shape and no dynamic dimensions.
    pub fn zero(&self) -> Result<()> {
        let (intmd, base) = {
            let data = self.0.borrow();
            (data.intmd_sizes.clone(), data.base_sizes.clone())
        };
        self.set(Tensor::zeros(&[], &intmd, &base))
    }

    /// The variable value in assembly format.
    pub fn get(&self) -> Result<Tensor> {
        let value = self.value()?;
        let data = self.0.borrow();
        to_assembly(
            &value,
            &[value.intmd_sizes()],
            &[&data.base_sizes],
            &data.name.to_string(),
        )
    }

    /// Assigns the variable value from a tensor in assembly format,
    /// using the cached intermediate shape.
    pub fn set_assembly(&self, assembly: Tensor) -> Result<()> {
        let (intmd, base, name) = {
            let referent = self.resolve();
            let data = referent.0.borrow();
            (
                data.intmd_sizes.clone(),
                data.base_sizes.clone(),
                data.name.to_string(),
            )
        };
        let value = from_assembly(&assembly, &[&intmd], &[&base], &name)?;
        self.set(value)
    }

    pub fn requires_grad(&self) -> bool {
        let referent = self.resolve();
        let data = referent.0.borrow();
        data.value.as_ref().map(|v| v.requires_grad()).unwrap_or(false)
    }

    /// Marks the current value as a differentiation leaf.
    pub fn requires_grad_(&self) -> Result<()> {
        let referent = self.resolve();
        let mut data = referent.0.borrow_mut();
        match data.value.as_mut() {
            Some(value) => {
                value.requires_grad_();
                Ok(())
            }
            None => Err(MateriaError::setup(format!(
                "cannot differentiate with respect to undefined variable '{}'",
                data.name
            ))),
        }
    }

    /// Clears the value (on the owning variable) and the derivatives.
    pub fn clear(&self) {
        let mut data = self.0.borrow_mut();
        if data.reference.is_none() {
            data.value = None;
        }
        data.derivs.clear();
        data.sec_derivs.clear();
    }

    pub fn clear_derivatives(&self) {
        let mut data = self.0.borrow_mut();
        data.derivs.clear();
        data.sec_derivs.clear();
    }

    fn arg_info(x: &Var, dep_dims: &[i64]) -> Result<ArgInfo> {
        let intmd = x.intmd_sizes();
        let mut dims: Vec<usize> = dep_dims
            .iter()
            .map(|d| normalize_dim(*d, intmd.len().max(1)))
            .collect::<Result<_>>()?;
        dims.sort_unstable();
        Ok(ArgInfo {
            name: x.name(),
            intmd_sizes: intmd,
            base_sizes: x.base_sizes(),
            dep_dims: dims,
        })
    }

    fn slot_index(
        slots: &mut Vec<DerivSlot>,
        y_intmd: Vec<usize>,
        y_base: Vec<usize>,
        y_dep: Vec<usize>,
        args: Vec<ArgInfo>,
    ) -> usize {
        let arg_names: Vec<&VariableName> = args.iter().map(|a| &a.name).collect();
        if let Some(i) = slots.iter().position(|s| {
            s.args.len() == arg_names.len()
                && s.args.iter().zip(&arg_names).all(|(a, n)| a.name == **n)
        }) {
            return i;
        }
        slots.push(DerivSlot {
            y_intmd,
            y_base,
            y_dep_dims: y_dep,
            args,
            value: None,
            assembly: None,
        });
        slots.len() - 1
    }

    fn normalized_y_deps(&self, dep_dims: &[i64]) -> Result<Vec<usize>> {
        let intmd = self.intmd_sizes();
        let mut dims: Vec<usize> = dep_dims
            .iter()
            .map(|d| normalize_dim(*d, intmd.len().max(1)))
            .collect::<Result<_>>()?;
        dims.sort_unstable();
        Ok(dims)
    }

    /// Assigns (additively) the first derivative with respect to `x`.
    pub fn d_assign(&self, x: &Var, v: Tensor) -> Result<()> {
        self.d_assign_deps(x, &[], &[], v)
    }

    /// Assigns the first derivative with declared dependent intermediate
    /// dimensions for the variable and the argument.
    pub fn d_assign_deps(&self, x: &Var, y_dep: &[i64], x_dep: &[i64], v: Tensor) -> Result<()> {
        let arg = Self::arg_info(x, x_dep)?;
        let y_dep = self.normalized_y_deps(y_dep)?;
        let (y_intmd, y_base) = (self.intmd_sizes(), self.base_sizes());
        let mut data = self.0.borrow_mut();
        let name = data.name.clone();
        let i = Self::slot_index(&mut data.derivs, y_intmd, y_base, y_dep, vec![arg]);
        data.derivs[i].assign(v, &name)
    }

    /// Assigns (additively) the second derivative with respect to `x1`
    /// and `x2`.
    pub fn d2_assign(&self, x1: &Var, x2: &Var, v: Tensor) -> Result<()> {
        self.d2_assign_deps(x1, x2, &[], &[], &[], v)
    }

    pub fn d2_assign_deps(
        &self,
        x1: &Var,
        x2: &Var,
        y_dep: &[i64],
        x1_dep: &[i64],
        x2_dep: &[i64],
        v: Tensor,
    ) -> Result<()> {
        let args = vec![Self::arg_info(x1, x1_dep)?, Self::arg_info(x2, x2_dep)?];
        let y_dep = self.normalized_y_deps(y_dep)?;
        let (y_intmd, y_base) = (self.intmd_sizes(), self.base_sizes());
        let mut data = self.0.borrow_mut();
        let name = data.name.clone();
        let i = Self::slot_index(&mut data.sec_derivs, y_intmd, y_base, y_dep, args);
        data.sec_derivs[i].assign(v, &name)
    }

    /// Sets the first derivative with respect to `x` from its assembly
    /// form.
    pub fn d_set_assembly(&self, x: &Var, assembly: Tensor) -> Result<()> {
        let arg = Self::arg_info(x, &[])?;
        let (y_intmd, y_base) = (self.intmd_sizes(), self.base_sizes());
        let mut data = self.0.borrow_mut();
        let name = data.name.clone();
        let i = Self::slot_index(&mut data.derivs, y_intmd, y_base, Vec::new(), vec![arg]);
        data.derivs[i].set(assembly, &name)
    }

    /// Sets the second derivative with respect to `x1` and `x2` from
    /// its assembly form.
    pub fn d2_set_assembly(&self, x1: &Var, x2: &Var, assembly: Tensor) -> Result<()> {
        let args = vec![Self::arg_info(x1, &[])?, Self::arg_info(x2, &[])?];
        let (y_intmd, y_base) = (self.intmd_sizes(), self.base_sizes());
        let mut data = self.0.borrow_mut();
        let name = data.name.clone();
        let i = Self::slot_index(&mut data.sec_derivs, y_intmd, y_base, Vec::new(), args);
        data.sec_derivs[i].set(assembly, &name)
    }

    /// Whether a non-null derivative with respect to `x` exists.
    pub fn has_derivative(&self, x: &VariableName) -> bool {
        self.0
            .borrow()
            .derivs
            .iter()
            .any(|s| s.args[0].name == *x && s.value.is_some())
    }

    /// The first derivatives in assembly form, in assignment order.
    pub fn derivatives(&self) -> Result<Vec<(VariableName, Tensor)>> {
        let mut data = self.0.borrow_mut();
        let name = data.name.clone();
        let mut out = Vec::new();
        for slot in data.derivs.iter_mut() {
            if let Some(assembly) = slot.get(&name)? {
                out.push((slot.args[0].name.clone(), assembly));
            }
        }
        Ok(out)
    }

    /// The second derivatives in assembly form, in assignment order.
    pub fn second_derivatives(&self) -> Result<Vec<(VariableName, VariableName, Tensor)>> {
        let mut data = self.0.borrow_mut();
        let name = data.name.clone();
        let mut out = Vec::new();
        for slot in data.sec_derivs.iter_mut() {
            if let Some(assembly) = slot.get(&name)? {
                out.push((slot.args[0].name.clone(), slot.args[1].name.clone(), assembly));
            }
        }
        Ok(out)
    }

    /// The assembly form of one first derivative.
    pub fn derivative_assembly(&self, x: &VariableName) -> Result<Option<Tensor>> {
        let mut data = self.0.borrow_mut();
        let name = data.name.clone();
        for slot in data.derivs.iter_mut() {
            if slot.args[0].name == *x {
                return slot.get(&name);
            }
        }
        Ok(None)
    }

    /// The assembly form of one second derivative.
    pub fn second_derivative_assembly(
        &self,
        x1: &VariableName,
        x2: &VariableName,
    ) -> Result<Option<Tensor>> {
        let mut data = self.0.borrow_mut();
        let name = data.name.clone();
        for slot in data.sec_derivs.iter_mut() {
            if slot.args[0].name == *x1 && slot.args[1].name == *x2 {
                return slot.get(&name);
            }
        }
        Ok(None)
    }

    /// The logical (full intermediate shape) form of one derivative.
    pub fn derivative_logical(&self, x: &VariableName) -> Option<Tensor> {
        self.0
            .borrow()
            .derivs
            .iter()
            .find(|s| s.args[0].name == *x)
            .and_then(|s| s.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, base: Vec<usize>) -> Var {
        Var::new(VariableName::parse(name), "Scalar", base)
    }

    #[test]
    fn referencing_forwards_values() {
        let parent = var("state.a", vec![]);
        let child = var("state.a", vec![]);
        child.set_reference(&parent).unwrap();

        parent.set(Tensor::scalar(3.0)).unwrap();
        assert_eq!(child.value().unwrap().item().unwrap(), 3.0);

        child.set(Tensor::scalar(5.0)).unwrap();
        assert_eq!(parent.value().unwrap().item().unwrap(), 5.0);
        assert!(!child.owning());
    }

    #[test]
    fn single_referent() {
        let a = var("state.a", vec![]);
        let b = var("state.a", vec![]);
        let c = var("state.a", vec![]);
        b.set_reference(&a).unwrap();
        assert!(b.set_reference(&c).is_err());
    }

    #[test]
    fn base_shape_checked() {
        let a = var("state.a", vec![3]);
        assert!(a.set(Tensor::scalar(1.0)).is_err());
        assert!(a.set(Tensor::zeros(&[], &[], &[3])).is_ok());
    }

    #[test]
    fn assembly_roundtrip() {
        let a = var("state.a", vec![3]);
        a.set(Tensor::from_data(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[], &[2], &[3]).unwrap())
            .unwrap();
        let assembled = a.get().unwrap();
        assert_eq!(assembled.base_sizes(), &[6]);

        a.set_assembly(assembled).unwrap();
        assert_eq!(a.value().unwrap().intmd_sizes(), &[2]);
    }

    #[test]
    fn derivative_direct_assignment() {
        let y = var("state.y", vec![]);
        let x = var("forces.x", vec![]);
        y.set(Tensor::scalar(1.0)).unwrap();
        x.set(Tensor::scalar(2.0)).unwrap();

        y.d_assign(&x, Tensor::scalar(4.0)).unwrap();
        y.d_assign(&x, Tensor::scalar(1.0)).unwrap();

        let derivs = y.derivatives().unwrap();
        assert_eq!(derivs.len(), 1);
        assert_eq!(derivs[0].1.item().unwrap(), 5.0);
    }

    #[test]
    fn derivative_diagonalization() {
        // y and x share an intermediate axis of size 2; assigning a
        // value with the variable's intermediate shape must produce a
        // diagonal derivative over the full (2, 2) intermediate shape.
        let y = var("state.y", vec![]);
        let x = var("forces.x", vec![]);
        y.set(Tensor::from_data(vec![1.0, 2.0], &[], &[2], &[]).unwrap())
            .unwrap();
        x.set(Tensor::from_data(vec![3.0, 4.0], &[], &[2], &[]).unwrap())
            .unwrap();

        y.d_assign(&x, Tensor::from_data(vec![5.0, 7.0], &[], &[2], &[]).unwrap())
            .unwrap();

        let logical = y.derivative_logical(&"forces.x".into()).unwrap();
        assert_eq!(logical.intmd_sizes(), &[2, 2]);
        assert_eq!(logical.data(), &[5.0, 0.0, 0.0, 7.0]);
    }

    #[test]
    fn derivative_dependent_dims_are_dense() {
        // With the argument's intermediate dim declared dependent, the
        // assigned value broadcasts across it instead of diagonalizing.
        let y = var("state.y", vec![]);
        let x = var("forces.x", vec![]);
        y.set(Tensor::from_data(vec![1.0, 2.0], &[], &[2], &[]).unwrap())
            .unwrap();
        x.set(Tensor::from_data(vec![3.0, 4.0], &[], &[2], &[]).unwrap())
            .unwrap();

        y.d_assign_deps(
            &x,
            &[0],
            &[0],
            Tensor::from_data(vec![5.0, 7.0], &[], &[2], &[]).unwrap(),
        )
        .unwrap();

        let logical = y.derivative_logical(&"forces.x".into()).unwrap();
        assert_eq!(logical.intmd_sizes(), &[2, 2]);
        assert_eq!(logical.data(), &[5.0, 5.0, 7.0, 7.0]);
    }
}

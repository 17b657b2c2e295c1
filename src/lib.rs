//! Materia is a library for building, composing, and evaluating
//! constitutive material models expressed as differentiable batched
//! tensor functions.
//!
//! A model maps named input variables (strains, temperatures, internal
//! state, old-step values) to named output variables (stresses, rates,
//! residuals) and, on demand, produces their first and second partial
//! derivatives with respect to inputs and parameters. Models may be
//! composed into a directed graph, or packaged as a nonlinear system
//! `r(u; g) = 0` for an implicit solve.
//!
//! The crate is organized in layers:
//!
//! * [`tensor`] — the batched tensor engine with the
//!   dynamic/intermediate/base dimension layout and the
//!   statically-shaped primitive tensor types;
//! * [`ad`] — reverse-mode automatic differentiation over the tensor
//!   operations;
//! * [`jit`] — capture and replay of forward operators keyed by an
//!   evaluation schema;
//! * [`model`] — the variable/parameter/derivative layer, the
//!   [`model::Model`] lifecycle, and model composition;
//! * [`system`] — the linear/nonlinear equation-system wrapping and the
//!   Schur-complement partitioned solve;
//! * [`dispatch`] — chunked evaluation of large batches;
//! * [`fem`] — minimal discretization kernels;
//! * [`base`] — options, input-file parsing, the registry and factory;
//! * [`models`] — the built-in model library.

#[cfg(test)]
mod tests {
    use crate::model::{Model, ModelBase, ValueMap, VariableName};
    use crate::models::ScalarOffset;
    use crate::tensor::Tensor;

    fn v(s: &str) -> VariableName {
        VariableName::parse(s)
    }

    fn offset_model(offset: f64, jit: bool) -> ScalarOffset {
        let mut base = ModelBase::new("offset");
        base.set_jit_enabled(jit);
        let offset = base
            .declare_parameter("offset", Tensor::scalar(offset))
            .unwrap();
        let mut model =
            ScalarOffset::new(base, "forces.x".into(), "state.y".into(), offset).unwrap();
        model.setup().unwrap();
        model
    }

    #[test]
    fn scalar_offset_value() {
        let mut model = offset_model(0.6, false);
        let mut inputs = ValueMap::new();
        inputs.insert("forces.x".into(), Tensor::scalar(5.0));

        let outputs = model.value(&inputs).unwrap();
        let y = &outputs[&v("state.y")];
        assert!((y.item().unwrap() - 5.6).abs() < 1e-14);
    }

    #[test]
    fn scalar_offset_derivative() {
        let mut model = offset_model(0.6, false);
        let mut inputs = ValueMap::new();
        inputs.insert("forces.x".into(), Tensor::scalar(5.0));

        let (outputs, derivs) = model.value_and_dvalue(&inputs).unwrap();
        assert!((outputs[&v("state.y")].item().unwrap() - 5.6).abs() < 1e-14);
        let dy_dx = &derivs[&v("state.y")][&v("forces.x")];
        assert!((dy_dx.item().unwrap() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn captured_forward_operator_replays() {
        let mut model = offset_model(1.5, true);

        let mut inputs = ValueMap::new();
        inputs.insert(
            "forces.x".into(),
            Tensor::from_data(vec![1.0, 2.0], &[2], &[], &[]).unwrap(),
        );

        // First call traces, second call replays, third call replays
        // with a different dynamic extent under the same schema.
        let first = model.value(&inputs).unwrap();
        let second = model.value(&inputs).unwrap();
        assert_eq!(first, second);

        let mut bigger = ValueMap::new();
        bigger.insert(
            "forces.x".into(),
            Tensor::from_data(vec![1.0, 2.0, 3.0], &[3], &[], &[]).unwrap(),
        );
        let third = model.value(&bigger).unwrap();
        let y = &third[&v("state.y")];
        assert_eq!(y.dynamic_sizes(), &[3]);
        assert_eq!(y.data(), &[2.5, 3.5, 4.5]);
    }

    #[test]
    fn inputs_default_to_zero() {
        let mut model = offset_model(0.25, false);
        let outputs = model.value(&ValueMap::new()).unwrap();
        assert!((outputs[&v("state.y")].item().unwrap() - 0.25).abs() < 1e-14);
    }
}

pub mod ad;
pub mod base;
pub mod dispatch;
pub mod errors;
pub mod fem;
pub mod jit;
pub mod model;
pub mod models;
pub mod prelude;
pub mod system;
pub mod tensor;

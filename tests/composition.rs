//! Composition of registered models over a dependency graph, with
//! chain-rule total derivatives.

use approx::assert_relative_eq;
use materia::base::{parser, Factory, Registry};
use materia::prelude::*;
use pretty_assertions::assert_eq;

fn v(s: &str) -> VariableName {
    VariableName::parse(s)
}

fn composed_factory() -> Factory {
    let text = r"
        [Models]
          [foo_model]
            type = ScalarOffset
            x = 'forces.temperature'
            y = 'state.foo'
            offset = 1.0
          []
          [bar_model]
            type = ScalarLinearCombination
            from_var = 'state.bar'
            coefficients = '2.0'
            to_var = 'state.bar_rate'
          []
          [baz_model]
            type = SR2Trace
            tensor = 'state.baz'
            to_var = 'state.baz_tr'
          []
          [sum_model]
            type = ScalarLinearCombination
            from_var = 'state.foo state.bar_rate state.baz_tr'
            to_var = 'state.sum'
          []
          [model]
            type = ComposedModel
            models = 'foo_model bar_model baz_model sum_model'
          []
        []
    ";
    Factory::new(parser::parse(text).unwrap(), Registry::with_builtins()).unwrap()
}

fn inputs() -> ValueMap {
    let mut inputs = ValueMap::new();
    inputs.insert(
        "forces.temperature".into(),
        Tensor::full(&[2, 5], &[], &[], 120.0),
    );
    inputs.insert("state.bar".into(), Tensor::scalar(-1.0));
    inputs.insert(
        "state.baz".into(),
        SR2::from_components(0.1, 0.2, 0.3, 0.0, 0.0, 0.0)
            .tensor()
            .clone(),
    );
    inputs
}

/// The assembled output equals the sum of the individual sub-model
/// outputs slot by slot, across the dynamic batch.
#[test]
fn composed_sum_matches_parts() {
    let mut factory = composed_factory();
    let model = factory.get_model("model").unwrap();

    let outputs = model.borrow_mut().value(&inputs()).unwrap();

    let foo = &outputs[&v("state.foo")];
    let bar_rate = &outputs[&v("state.bar_rate")];
    let baz_tr = &outputs[&v("state.baz_tr")];
    let sum = &outputs[&v("state.sum")];

    assert_eq!(sum.dynamic_sizes(), &[2, 5]);
    assert_relative_eq!(foo.data()[0], 121.0);
    assert_relative_eq!(bar_rate.item().unwrap(), -2.0);
    assert_relative_eq!(baz_tr.item().unwrap(), 0.6, epsilon = 1e-12);

    let expected = foo
        .add(bar_rate)
        .unwrap()
        .add(baz_tr)
        .unwrap();
    for (s, e) in sum.data().iter().zip(expected.data()) {
        assert_relative_eq!(s, e, epsilon = 1e-12);
    }
}

/// Total derivatives from the chain-rule walk match a finite-difference
/// estimate.
#[test]
fn chain_rule_matches_finite_difference() {
    let mut factory = composed_factory();
    let model = factory.get_model("model").unwrap();

    let base_inputs = inputs();
    let (_, derivs) = model.borrow_mut().value_and_dvalue(&base_inputs).unwrap();

    let d_sum = &derivs[&v("state.sum")];
    let d_temp = &d_sum[&v("forces.temperature")];
    let d_bar = &d_sum[&v("state.bar")];
    let d_baz = &d_sum[&v("state.baz")];

    // d(sum)/d(temperature) = 1 through foo, d(sum)/d(bar) = 2 through
    // bar_rate, d(sum)/d(baz) = the trace row.
    assert_relative_eq!(d_temp.data()[0], 1.0, epsilon = 1e-12);
    assert_relative_eq!(d_bar.item().unwrap(), 2.0, epsilon = 1e-12);
    for (i, expected) in [1.0, 1.0, 1.0, 0.0, 0.0, 0.0].iter().enumerate() {
        assert_relative_eq!(d_baz.data()[i], *expected, epsilon = 1e-12);
    }

    // Finite-difference check on the scalar arguments.
    let h = 1e-6;
    let sum_at = |inputs: &ValueMap, model: &ModelRef| -> f64 {
        let outputs = model.borrow_mut().value(inputs).unwrap();
        outputs[&v("state.sum")].data()[0]
    };

    let f0 = sum_at(&base_inputs, &model);

    let mut perturbed = base_inputs.clone();
    perturbed.insert("state.bar".into(), Tensor::scalar(-1.0 + h));
    let fd_bar = (sum_at(&perturbed, &model) - f0) / h;
    assert_relative_eq!(fd_bar, d_bar.item().unwrap(), epsilon = 1e-5);

    let mut perturbed = base_inputs.clone();
    perturbed.insert(
        "forces.temperature".into(),
        Tensor::full(&[2, 5], &[], &[], 120.0 + h),
    );
    let fd_temp = (sum_at(&perturbed, &model) - f0) / h;
    assert_relative_eq!(fd_temp, d_temp.data()[0], epsilon = 1e-5);
}

/// The captured graph of a composed model replays to identical outputs.
#[test]
fn composed_jit_replay_is_deterministic() {
    let mut factory = composed_factory();
    let model = factory.get_model("model").unwrap();

    let first = model.borrow_mut().value(&inputs()).unwrap();
    let second = model.borrow_mut().value(&inputs()).unwrap();
    assert_eq!(first, second);
}

/// A model with no automatic differentiation produces the same values
/// and derivatives whether or not they are requested together.
#[test]
fn value_and_dvalue_consistency() {
    let mut factory = composed_factory();
    let model = factory.get_model("sum_model").unwrap();

    let mut sum_inputs = ValueMap::new();
    sum_inputs.insert("state.foo".into(), Tensor::scalar(1.0));
    sum_inputs.insert("state.bar_rate".into(), Tensor::scalar(2.0));
    sum_inputs.insert("state.baz_tr".into(), Tensor::scalar(3.0));

    let values_only = model.borrow_mut().value(&sum_inputs).unwrap();
    let derivs_only = model.borrow_mut().dvalue(&sum_inputs).unwrap();
    let (values, derivs) = model.borrow_mut().value_and_dvalue(&sum_inputs).unwrap();

    assert_eq!(values, values_only);
    assert_eq!(derivs, derivs_only);
}

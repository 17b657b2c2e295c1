//! End-to-end model evaluation through the factory: scalar models,
//! linear isotropic elasticity, and nonlinear parameter coupling.

use approx::assert_relative_eq;
use materia::base::{parser, Factory, Registry};
use materia::prelude::*;

fn v(s: &str) -> VariableName {
    VariableName::parse(s)
}

fn factory(text: &str) -> Factory {
    Factory::new(parser::parse(text).unwrap(), Registry::with_builtins()).unwrap()
}

#[test]
fn scalar_offset_from_input_file() {
    let mut factory = factory(
        r"
        [Models]
          [eq]
            type = ScalarOffset
            x = 'forces.x'
            y = 'state.y'
            offset = 0.6
          []
        []
        ",
    );
    let model = factory.get_model("eq").unwrap();

    let mut inputs = ValueMap::new();
    inputs.insert("forces.x".into(), Tensor::scalar(5.0));
    let outputs = model.borrow_mut().value(&inputs).unwrap();

    assert_relative_eq!(outputs[&v("state.y")].item().unwrap(), 5.6);
}

#[test]
fn load_model_from_disk() {
    let path = std::env::temp_dir().join("materia_scalar_offset_test.i");
    std::fs::write(
        &path,
        "[Models]\n  [eq]\n    type = ScalarOffset\n    offset = 0.25\n  []\n[]\n",
    )
    .unwrap();

    let model = materia::base::load_model(&path, "eq").unwrap();
    let mut inputs = ValueMap::new();
    inputs.insert("forces.x".into(), Tensor::scalar(1.0));
    let outputs = model.borrow_mut().value(&inputs).unwrap();
    assert_relative_eq!(outputs[&v("state.y")].item().unwrap(), 1.25);

    std::fs::remove_file(&path).ok();
}

#[test]
fn factory_creates_each_model_once() {
    let mut factory = factory(
        r"
        [Models]
          [eq]
            type = ScalarOffset
            offset = 1.0
          []
        []
        ",
    );
    let a = factory.get_model("eq").unwrap();
    let b = factory.get_model("eq").unwrap();
    assert!(std::rc::Rc::ptr_eq(&a, &b));
}

/// Hooke's law with E = 100, nu = 0.3 against the closed-form isotropic
/// stress, component by component.
#[test]
fn linear_isotropic_elasticity() {
    let mut factory = factory(
        r"
        [Models]
          [model]
            type = LinearIsotropicElasticity
            strain = 'state.internal.Ee'
            stress = 'state.S'
            youngs_modulus = 100.0
            poissons_ratio = 0.3
          []
        []
        ",
    );
    let model = factory.get_model("model").unwrap();

    let strain = SR2::from_components(0.1, 0.05, -0.03, 0.02, 0.06, 0.03);
    let mut inputs = ValueMap::new();
    inputs.insert("state.internal.Ee".into(), strain.tensor().clone());
    let outputs = model.borrow_mut().value(&inputs).unwrap();

    let stress = SR2::from_tensor(outputs[&v("state.S")].clone()).unwrap();

    // lambda tr(e) I + 2 mu e
    let (e, nu) = (100.0, 0.3);
    let lambda = e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
    let mu = e / (2.0 * (1.0 + nu));
    let tr = 0.1 + 0.05 - 0.03;

    let full = stress.to_full().unwrap();
    let strain_full = strain.to_full().unwrap();
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { lambda * tr } else { 0.0 }
                + 2.0 * mu * strain_full.tensor().at(&[i, j]);
            assert_relative_eq!(full.tensor().at(&[i, j]), expected, epsilon = 1e-10);
        }
    }
}

/// The stiffness parameters can be provided by another model, resolved
/// by name into nonlinear parameters.
#[test]
fn nonlinear_parameter_coupling() {
    let mut factory = factory(
        r"
        [Models]
          [E_model]
            type = ScalarConstantParameter
            value = 100.0
          []
          [model]
            type = LinearIsotropicElasticity
            youngs_modulus = 'E_model'
            poissons_ratio = 0.3
          []
        []
        ",
    );
    let model = factory.get_model("model").unwrap();

    let strain = SR2::from_components(0.01, 0.01, 0.01, 0.0, 0.0, 0.0);
    let mut inputs = ValueMap::new();
    inputs.insert("state.internal.Ee".into(), strain.tensor().clone());

    let (outputs, derivs) = model.borrow_mut().value_and_dvalue(&inputs).unwrap();

    let stress = &outputs[&v("state.S")];
    let k = 100.0 / (3.0 * (1.0 - 2.0 * 0.3));
    assert_relative_eq!(stress.data()[0], 3.0 * k * 0.01, epsilon = 1e-10);

    // The derivative with respect to the nonlinear parameter comes from
    // the differentiation graph: dS/dE = S / E for fixed nu.
    let ds_de = &derivs[&v("state.S")][&v("parameters.youngs_modulus")];
    assert_relative_eq!(ds_de.data()[0], stress.data()[0] / 100.0, epsilon = 1e-10);
}

/// Second derivatives extracted by differentiating the first derivative
/// again.
#[test]
fn second_derivatives_via_ad() {
    let mut factory = factory(
        r"
        [Models]
          [r]
            type = ScalarSquareResidual
          []
        []
        ",
    );
    let model = factory.get_model("r").unwrap();

    let mut inputs = ValueMap::new();
    inputs.insert("state.x".into(), Tensor::scalar(3.0));
    inputs.insert("forces.f".into(), Tensor::scalar(1.0));

    let (values, derivs, sec_derivs) = model
        .borrow_mut()
        .value_and_dvalue_and_d2value(&inputs)
        .unwrap();

    assert_relative_eq!(values[&v("residual.x")].item().unwrap(), 8.0);
    assert_relative_eq!(
        derivs[&v("residual.x")][&v("state.x")].item().unwrap(),
        6.0
    );
    assert_relative_eq!(
        sec_derivs[&v("residual.x")][&v("state.x")][&v("state.x")]
            .item()
            .unwrap(),
        2.0
    );
}

//! The nonlinear-system wrapping of a model and the Schur-complement
//! partitioned solve.

use approx::assert_relative_eq;
use materia::base::{parser, Factory, Registry};
use materia::prelude::*;

fn factory(text: &str) -> Factory {
    Factory::new(parser::parse(text).unwrap(), Registry::with_builtins()).unwrap()
}

/// First-order consistency of the assembled Jacobian:
/// `r(u0 + du) ~ r(u0) + A du`.
#[test]
fn residual_linearization() {
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
    let mut system = ModelNonlinearSystem::new(model, true).unwrap();

    system.set_g(vec![Some(Tensor::scalar(3.0))]).unwrap();
    system.set_u(vec![Some(Tensor::scalar(2.0))]).unwrap();

    let (a, b) = system.A_and_b().unwrap();
    let a00 = a[0].as_ref().unwrap().item().unwrap();
    let r0 = -b[0].as_ref().unwrap().item().unwrap();
    assert_relative_eq!(r0, 1.0);
    assert_relative_eq!(a00, 4.0);

    let du = 0.01;
    system.set_u(vec![Some(Tensor::scalar(2.0 + du))]).unwrap();
    let b1 = system.b().unwrap();
    let r1 = -b1[0].as_ref().unwrap().item().unwrap();

    // The residual is quadratic, so the linearization error is du^2.
    assert_relative_eq!(r1, r0 + a00 * du, epsilon = 2.0 * du * du);
}

fn two_by_two_system() -> ModelNonlinearSystem {
    let mut factory = factory(
        r"
        [Models]
          [ra]
            type = ScalarLinearCombination
            from_var = 'state.a state.b forces.fa'
            coefficients = '1.0 1.0 -1.0'
            to_var = 'residual.a'
          []
          [rb]
            type = ScalarLinearCombination
            from_var = 'state.a state.b forces.fb'
            coefficients = '1.0 2.0 -1.0'
            to_var = 'residual.b'
          []
          [model]
            type = ComposedModel
            models = 'ra rb'
          []
        []
        ",
    );
    let model = factory.get_model("model").unwrap();
    ModelNonlinearSystem::new(model, true).unwrap()
}

/// Schur-complement solve of `[[1, 1], [1, 2]] u = [3, 5]`.
#[test]
fn schur_complement_solve() {
    let mut system = two_by_two_system();
    system
        .set_variable_groups(&[
            vec![VariableName::parse("state.a")],
            vec![VariableName::parse("state.b")],
        ])
        .unwrap();

    system
        .set_g(vec![Some(Tensor::scalar(3.0)), Some(Tensor::scalar(5.0))])
        .unwrap();
    system
        .set_u(vec![Some(Tensor::scalar(0.0)), Some(Tensor::scalar(0.0))])
        .unwrap();

    let solver = SchurComplement::new(0, 1).unwrap();
    let u = solver.solve(&mut system).unwrap();

    assert_relative_eq!(u[0].as_ref().unwrap().item().unwrap(), 1.0, epsilon = 1e-12);
    assert_relative_eq!(u[1].as_ref().unwrap().item().unwrap(), 2.0, epsilon = 1e-12);
}

/// The Schur solver refuses systems that are not partitioned into
/// exactly two groups.
#[test]
fn schur_complement_requires_two_groups() {
    let mut system = two_by_two_system();
    let solver = SchurComplement::new(0, 1).unwrap();
    assert!(solver.solve(&mut system).is_err());
}

/// The implicit-function-theorem variant returns `-du/dg`.
#[test]
fn schur_complement_ift() {
    let mut system = two_by_two_system();
    system
        .set_variable_groups(&[
            vec![VariableName::parse("state.a")],
            vec![VariableName::parse("state.b")],
        ])
        .unwrap();

    system
        .set_g(vec![Some(Tensor::scalar(3.0)), Some(Tensor::scalar(5.0))])
        .unwrap();
    system
        .set_u(vec![Some(Tensor::scalar(1.0)), Some(Tensor::scalar(2.0))])
        .unwrap();

    let solver = SchurComplement::new(0, 1).unwrap();
    let x = solver.ift(&mut system).unwrap();

    // r = A u - g, so du/dg = A^-1 and -du/dg = -A^-1.
    // A^-1 = [[2, -1], [-1, 1]].
    let expected = [[-2.0, 1.0], [1.0, -1.0]];
    for (k, block) in x.iter().enumerate() {
        let (i, j) = (k / 2, k % 2);
        assert_relative_eq!(
            block.as_ref().unwrap().item().unwrap(),
            expected[i][j],
            epsilon = 1e-12
        );
    }
}

/// Old-step maps pair current and old variables positionally.
#[test]
fn old_state_maps() {
    let mut factory = factory(
        r"
        [Models]
          [r]
            type = ScalarLinearCombination
            from_var = 'state.a old_state.a forces.f'
            coefficients = '1.0 -1.0 -1.0'
            to_var = 'residual.a'
          []
        []
        ",
    );
    let model = factory.get_model("r").unwrap();
    let mut system = ModelNonlinearSystem::new(model, true).unwrap();

    assert_eq!(system.unmap(), &[VariableName::parse("old_state.a")]);
    assert_eq!(system.un_to_u(), &[Some(0)]);
    assert_eq!(system.u_to_un(), &[Some(0)]);

    system.set_un(vec![Some(Tensor::scalar(1.0))]).unwrap();
    system.set_g(vec![Some(Tensor::scalar(0.5))]).unwrap();
    system.set_u(vec![Some(Tensor::scalar(4.0))]).unwrap();

    let b = system.b().unwrap();
    // r = u - u_old - f = 4 - 1 - 0.5
    assert_relative_eq!(-b[0].as_ref().unwrap().item().unwrap(), 2.5);

    let un = system.un().unwrap();
    assert_relative_eq!(un[0].as_ref().unwrap().item().unwrap(), 1.0);
}

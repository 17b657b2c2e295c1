//! The discretization mini-pipeline: scatter a nodal solution over a
//! 2 x 2 quad mesh, interpolate gradients with a linear basis, form the
//! strain, run the elasticity model, and assemble the global residual.

use approx::assert_relative_eq;
use materia::base::{parser, Factory, Registry};
use materia::fem::{assemble, interpolate, scatter, DofMap};
use materia::prelude::*;

fn v(s: &str) -> VariableName {
    VariableName::parse(s)
}

/// The 2 x 2 quad mesh with 9 nodes and 2 displacement variables:
///
/// ```text
///    0---1---2
///    | 0 | 1 |
///    3---4---5
///    | 2 | 3 |
///    6---7---8
/// ```
///
/// The x-displacement dofs coincide with the node ids; the
/// y-displacement dofs are offset by 9.
fn dof_map() -> DofMap {
    let elements: [[usize; 4]; 4] = [[0, 3, 4, 1], [1, 4, 5, 2], [3, 6, 7, 4], [4, 7, 8, 5]];
    let mut indices = Vec::with_capacity(4 * 4 * 2);
    for nodes in &elements {
        for node in nodes {
            indices.push(*node);
            indices.push(node + 9);
        }
    }
    DofMap::new(indices, 4, 4, 2).unwrap()
}

/// First-order Lagrange basis evaluated at the four Gauss points,
/// base shape (ndofe, nqp).
fn basis() -> (Tensor, Tensor) {
    let g = 3.0_f64.sqrt() / 3.0;
    let xi = [-g, -g, g, g];
    let eta = [g, -g, g, -g];

    let mut phi = vec![0.0; 16];
    let mut dphi = vec![0.0; 48];
    for q in 0..4 {
        let (x, e) = (xi[q], eta[q]);
        let values = [
            (1.0 - x) * (1.0 + e) / 4.0,
            (1.0 - x) * (1.0 - e) / 4.0,
            (1.0 + x) * (1.0 - e) / 4.0,
            (1.0 + x) * (1.0 + e) / 4.0,
        ];
        let gradients = [
            [-(1.0 + e) / 4.0, (1.0 - x) / 4.0, 0.0],
            [-(1.0 - e) / 4.0, -(1.0 - x) / 4.0, 0.0],
            [(1.0 - e) / 4.0, -(1.0 + x) / 4.0, 0.0],
            [(1.0 + e) / 4.0, (1.0 + x) / 4.0, 0.0],
        ];
        for d in 0..4 {
            phi[d * 4 + q] = values[d];
            for m in 0..3 {
                dphi[(d * 4 + q) * 3 + m] = gradients[d][m];
            }
        }
    }

    (
        Tensor::from_data(phi, &[], &[], &[4, 4]).unwrap(),
        Tensor::from_data(dphi, &[], &[], &[4, 4, 3]).unwrap(),
    )
}

#[test]
fn elasticity_residual_pipeline() {
    let map = dof_map();
    let (_phi, dphi) = basis();

    // The nodal solution: dof k holds the value k.
    let sol = Tensor::from_data((0..18).map(|i| i as f64).collect(), &[], &[], &[18]).unwrap();

    // Scatter to the element-local layout.
    let scattered = scatter(&sol, &map).unwrap();
    assert_eq!(scattered.dynamic_sizes(), &[4]);
    assert_eq!(scattered.base_sizes(), &[4, 2]);
    assert_relative_eq!(scattered.at(&[0, 1, 0]), 3.0);
    assert_relative_eq!(scattered.at(&[0, 1, 1]), 12.0);

    // Interpolate the solution gradient to the quadrature points. With
    // the identity isoparametric map and this nodal field, the gradient
    // is (0.5, -1.5, 0) for both variables at every quadrature point.
    let grad = interpolate(&scattered, &dphi).unwrap();
    assert_eq!(grad.base_sizes(), &[2, 4, 3]);
    for v in 0..2 {
        for q in 0..4 {
            assert_relative_eq!(grad.at(&[0, v, q, 0]), 0.5, epsilon = 1e-12);
            assert_relative_eq!(grad.at(&[0, v, q, 1]), -1.5, epsilon = 1e-12);
            assert_relative_eq!(grad.at(&[0, v, q, 2]), 0.0, epsilon = 1e-12);
        }
    }

    // Form the strain at every (element, quadrature point):
    // e = sym(grad u) with grad u rows (du_x, du_y, 0).
    let sqrt2 = std::f64::consts::SQRT_2;
    let e_xy = 0.5 * (-1.5 + 0.5);
    let mandel = [0.5, -1.5, 0.0, 0.0, 0.0, sqrt2 * e_xy];
    let mut strain_data = Vec::with_capacity(4 * 4 * 6);
    for _ in 0..16 {
        strain_data.extend_from_slice(&mandel);
    }
    let strain = Tensor::from_data(strain_data, &[4, 4], &[], &[6]).unwrap();

    // The constitutive update maps strain to stress.
    let mut factory = Factory::new(
        parser::parse(
            r"
            [Models]
              [model]
                type = LinearIsotropicElasticity
                youngs_modulus = 100.0
                poissons_ratio = 0.3
              []
            []
            ",
        )
        .unwrap(),
        Registry::with_builtins(),
    )
    .unwrap();
    let model = factory.get_model("model").unwrap();

    let mut inputs = ValueMap::new();
    inputs.insert("state.internal.Ee".into(), strain);
    let outputs = model.borrow_mut().value(&inputs).unwrap();
    let stress = SR2::from_tensor(outputs[&v("state.S")].clone()).unwrap();
    assert_eq!(stress.tensor().dynamic_sizes(), &[4, 4]);

    // Element residual r_{e,d,v} = sum_q dphi_{d,q,m} sigma_{e,q,v,m}
    // with unit Jacobian, weights, and coordinate transformation. Fold
    // the quadrature batch into the base so the contraction runs over
    // it.
    let full = stress.to_full().unwrap();
    let sigma = full
        .tensor()
        .reshape_full(&[4, 4, 3, 3], 1, 0)
        .unwrap();
    let re = einsum("...dqm,...qvm->...dv", &[&dphi, &sigma]).unwrap();
    assert_eq!(re.base_sizes(), &[4, 3]);

    // Keep the two in-plane variables and assemble the global residual.
    let re = re.base_narrow(1, 0, 2).unwrap();
    let r = assemble(&re, &map, 18).unwrap();
    assert_eq!(r.base_sizes(), &[18]);

    let expected = [
        -19.230769, -76.923077, -57.692308, 38.461538, 0.0, -38.461538, 57.692308, 76.923077,
        19.230769, -134.61538, -346.15385, -211.53846, 76.923077, 0.0, -76.923077, 211.53846,
        346.15385, 134.61538,
    ];
    for (value, reference) in r.data().iter().zip(expected.iter()) {
        assert_relative_eq!(value, reference, epsilon = 1e-4);
    }
}

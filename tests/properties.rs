//! Quantified properties of the tensor engine and the evaluation
//! machinery.

use approx::assert_relative_eq;
use materia::base::{parser, Factory, Registry};
use materia::dispatch::UniformSequentialValueMapDispatcher;
use materia::prelude::*;
use materia::tensor::assembly::{
    assemble_vector, disassemble_vector, from_assembly, to_assembly,
};

fn v(s: &str) -> VariableName {
    VariableName::parse(s)
}

fn iota(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64 * 0.5 - 3.0).collect()
}

/// `from_assembly(to_assembly(t)) == t` for a spread of compatible
/// intermediate/base shape pairs.
#[test]
fn assembly_roundtrip() {
    let cases: Vec<(Vec<usize>, Vec<usize>, Vec<usize>)> = vec![
        (vec![], vec![], vec![]),
        (vec![3], vec![], vec![6]),
        (vec![], vec![4], vec![3, 3]),
        (vec![2, 5], vec![4], vec![6]),
        (vec![2], vec![3, 2], vec![]),
    ];

    for (dynamic, intmd, base) in cases {
        let n = dynamic.iter().product::<usize>()
            * intmd.iter().product::<usize>()
            * base.iter().product::<usize>();
        let t = Tensor::from_data(iota(n.max(1)), &dynamic, &intmd, &base).unwrap();

        let assembled = to_assembly(&t, &[&intmd], &[&base], "t").unwrap();
        assert_eq!(assembled.intmd_dim(), 0);
        assert_eq!(assembled.base_dim(), 1);

        let back = from_assembly(&assembled, &[&intmd], &[&base], "t").unwrap();
        assert_eq!(back, t);
    }
}

/// `disassemble(assemble(xs)) == xs` for a list of shape-compatible
/// tensors.
#[test]
fn assemble_disassemble_roundtrip() {
    let xs = vec![
        Some(Tensor::from_data(iota(6), &[], &[], &[6]).unwrap()),
        Some(Tensor::from_data(iota(8), &[], &[2], &[4]).unwrap()),
        Some(Tensor::from_data(iota(1), &[], &[], &[]).unwrap()),
    ];
    let intmd = vec![vec![], vec![2], vec![]];
    let base = vec![vec![6], vec![4], vec![]];

    let flat = assemble_vector(&xs, Some(&intmd), &base).unwrap();
    assert_eq!(flat.base_sizes(), &[15]);

    let parts = disassemble_vector(&flat, Some(&intmd), &base).unwrap();
    for (part, x) in parts.iter().zip(&xs) {
        assert_eq!(part, x.as_ref().unwrap());
    }
}

/// Chunked dispatch of a model evaluation reduces to the same result as
/// the direct evaluation.
#[test]
fn dispatcher_is_transparent() {
    let mut factory = Factory::new(
        parser::parse(
            r"
            [Models]
              [eq]
                type = ScalarOffset
                offset = 0.5
              []
            []
            ",
        )
        .unwrap(),
        Registry::with_builtins(),
    )
    .unwrap();
    let model = factory.get_model("eq").unwrap();

    let mut inputs = ValueMap::new();
    inputs.insert(
        "forces.x".into(),
        Tensor::from_data(iota(12), &[12], &[], &[]).unwrap(),
    );

    let direct = model.borrow_mut().value(&inputs).unwrap();

    let dispatcher = UniformSequentialValueMapDispatcher::new(0, 5);
    let chunked = dispatcher
        .run(&inputs, |chunk| model.borrow_mut().value(&chunk))
        .unwrap();

    assert_eq!(direct, chunked);
}

/// The evaluation schema distinguishes batch layouts: replaying with a
/// different dynamic rank retraces instead of misusing a cached graph.
#[test]
fn jit_schema_keying() {
    let mut factory = Factory::new(
        parser::parse(
            r"
            [Models]
              [eq]
                type = ScalarOffset
                offset = 1.0
              []
            []
            ",
        )
        .unwrap(),
        Registry::with_builtins(),
    )
    .unwrap();
    let model = factory.get_model("eq").unwrap();

    let mut flat = ValueMap::new();
    flat.insert(
        "forces.x".into(),
        Tensor::from_data(vec![1.0, 2.0], &[2], &[], &[]).unwrap(),
    );
    let mut nested = ValueMap::new();
    nested.insert(
        "forces.x".into(),
        Tensor::from_data(vec![1.0, 2.0, 3.0, 4.0], &[2, 2], &[], &[]).unwrap(),
    );

    let a = model.borrow_mut().value(&flat).unwrap();
    let b = model.borrow_mut().value(&nested).unwrap();

    assert_eq!(a[&v("state.y")].dynamic_sizes(), &[2]);
    assert_eq!(b[&v("state.y")].dynamic_sizes(), &[2, 2]);
    assert_relative_eq!(b[&v("state.y")].data()[3], 5.0);
}

/// A captured graph that extracts derivatives by automatic
/// differentiation replays correctly at a different dynamic extent of
/// the same rank: per-batch first and second derivatives follow the
/// runtime batch size, not the capture-time one.
#[test]
fn jit_replay_of_ad_derivatives_across_extents() {
    let mut factory = Factory::new(
        parser::parse(
            r"
            [Models]
              [r]
                type = ScalarSquareResidual
              []
            []
            ",
        )
        .unwrap(),
        Registry::with_builtins(),
    )
    .unwrap();
    let model = factory.get_model("r").unwrap();

    let evaluate = |model: &ModelRef, u: Vec<f64>| {
        let n = u.len();
        let mut inputs = ValueMap::new();
        inputs.insert("state.x".into(), Tensor::from_data(u, &[n], &[], &[]).unwrap());
        inputs.insert("forces.f".into(), Tensor::zeros(&[n], &[], &[]));
        model
            .borrow_mut()
            .value_and_dvalue_and_d2value(&inputs)
            .unwrap()
    };

    // The first call captures the graph at extent 3; the second call
    // hits the same schema (same rank, same intermediate shapes) with
    // extent 7 and must replay against the runtime extent.
    for u in [vec![0.5, 1.5, 2.5], (1..=7).map(|i| i as f64).collect()] {
        let n = u.len();
        let (values, derivs, sec_derivs) = evaluate(&model, u.clone());

        let r = &values[&v("residual.x")];
        assert_eq!(r.dynamic_sizes(), &[n]);

        let dr_du = &derivs[&v("residual.x")][&v("state.x")];
        assert_eq!(dr_du.dynamic_sizes(), &[n]);
        for (i, ui) in u.iter().enumerate() {
            assert_relative_eq!(r.data()[i], ui * ui, epsilon = 1e-12);
            assert_relative_eq!(dr_du.data()[i], 2.0 * ui, epsilon = 1e-12);
        }

        let d2r = &sec_derivs[&v("residual.x")][&v("state.x")][&v("state.x")];
        assert_eq!(d2r.dynamic_sizes(), &[n]);
        for i in 0..n {
            assert_relative_eq!(d2r.data()[i], 2.0, epsilon = 1e-12);
        }
    }
}

/// A captured gradient that reduces over a broadcast batch (a shared
/// unbatched nonlinear parameter under a batched strain) sums to the
/// runtime extent on replay. This is exactly what chunked dispatch with
/// a shorter last chunk produces.
#[test]
fn jit_replay_reduces_to_runtime_extent() {
    let mut factory = Factory::new(
        parser::parse(
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
        )
        .unwrap(),
        Registry::with_builtins(),
    )
    .unwrap();
    let model = factory.get_model("model").unwrap();

    let hydrostatic = |n: usize| {
        let mut data = Vec::with_capacity(n * 6);
        for _ in 0..n {
            data.extend_from_slice(&[0.01, 0.01, 0.01, 0.0, 0.0, 0.0]);
        }
        Tensor::from_data(data, &[n], &[], &[6]).unwrap()
    };

    // s_xx = 3 K tr / 3 with K = E / (3 (1 - 2 nu)); the derivative
    // with respect to the shared parameter sums over the batch.
    let s_xx = 100.0 / (1.0 - 2.0 * 0.3) * 0.01;

    for n in [2usize, 5] {
        let mut inputs = ValueMap::new();
        inputs.insert("state.internal.Ee".into(), hydrostatic(n));
        let (outputs, derivs) = model.borrow_mut().value_and_dvalue(&inputs).unwrap();

        let stress = &outputs[&v("state.S")];
        assert_eq!(stress.dynamic_sizes(), &[n]);
        for b in 0..n {
            assert_relative_eq!(stress.data()[b * 6], s_xx, epsilon = 1e-10);
        }

        let ds_de = &derivs[&v("state.S")][&v("parameters.youngs_modulus")];
        assert_relative_eq!(
            ds_de.data()[0],
            n as f64 * s_xx / 100.0,
            epsilon = 1e-10
        );
        assert_relative_eq!(ds_de.data()[3], 0.0, epsilon = 1e-10);
    }
}

/// Primitive tensor types expose their stable names and base shapes for
/// introspection.
#[test]
fn tensor_type_introspection() {
    assert_eq!(Scalar::TYPE_NAME, "Scalar");
    assert_eq!(Vec3::TYPE_NAME, "Vec");
    assert_eq!(R2::TYPE_NAME, "R2");
    assert_eq!(SR2::TYPE_NAME, "SR2");
    assert_eq!(SSR4::TYPE_NAME, "SSR4");
    assert_eq!(Rot::TYPE_NAME, "Rot");
    assert_eq!(Quaternion::TYPE_NAME, "Quaternion");

    assert_eq!(SR2::const_base_sizes(), vec![6]);
    assert_eq!(SSR4::const_base_sizes(), vec![6, 6]);
}

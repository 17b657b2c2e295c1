//! `primitives` defines the statically-shaped tensor family: thin
//! newtypes over [`Tensor`] whose base shape is fixed at the type level.
//!
//! Each primitive type carries its base shape as a `typenum` shape and a
//! stable string name used by introspection. Conversion from an untyped
//! tensor checks the base shape; everything batched (dynamic and
//! intermediate dimensions) passes through untouched. The physical
//! operations (Mandel conversions, deviator/volumetric split, isotropic
//! stiffness, rotations) are built from regular tensor operations, so
//! they differentiate and trace like everything else.
//!
//! Symmetric second order tensors use the Mandel convention: storage is
//! `(xx, yy, zz, sqrt(2) yz, sqrt(2) xz, sqrt(2) xy)`.

use super::shape::{NumElements, Shape0D, Shape1D, Shape2D, StaticShape};
use super::tensor::Tensor;
use crate::errors::{MateriaError, Result};
use generic_array::GenericArray;
use std::ops::Deref;
use typenum::{U3, U4, U6};

/// The uniform surface of a statically-shaped tensor type.
pub trait PrimitiveTensor: Sized {
    /// Type-level base shape.
    type BaseShape: StaticShape;

    /// Stable name used by introspection.
    const TYPE_NAME: &'static str;

    /// The runtime base shape of this type.
    fn const_base_sizes() -> Vec<usize> {
        Self::BaseShape::to_vec()
    }

    /// Wraps a tensor, checking its base shape.
    fn from_tensor(t: Tensor) -> Result<Self>;

    /// The underlying untyped tensor.
    fn tensor(&self) -> &Tensor;

    /// Unwraps into the underlying untyped tensor.
    fn into_tensor(self) -> Tensor;
}

macro_rules! define_primitive {
    ($(#[$doc:meta])* $name:ident, $shape:ty, $type_name:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name(Tensor);

        impl PrimitiveTensor for $name {
            type BaseShape = $shape;

            const TYPE_NAME: &'static str = $type_name;

            fn from_tensor(t: Tensor) -> Result<Self> {
                let expected = <$shape as StaticShape>::to_vec();
                if t.base_sizes() != expected.as_slice() {
                    return Err(MateriaError::shape(format!(
                        "cannot view base shape {:?} as {} (base shape {:?})",
                        t.base_sizes(),
                        $type_name,
                        expected
                    )));
                }
                Ok($name(t))
            }

            fn tensor(&self) -> &Tensor {
                &self.0
            }

            fn into_tensor(self) -> Tensor {
                self.0
            }
        }

        impl $name {
            /// Unbatched value from a fixed-size array of components.
            pub fn from_array(
                data: GenericArray<f64, <$shape as NumElements<f64>>::Output>,
            ) -> Self {
                let base = <$shape as StaticShape>::to_vec();
                $name(
                    Tensor::from_data(data.into_iter().collect(), &[], &[], &base)
                        .expect("a fixed-size array always fills its base shape"),
                )
            }

            /// Unbatched value with every component equal to `value`.
            pub fn fill(value: f64) -> Self {
                let base = <$shape as StaticShape>::to_vec();
                $name(Tensor::full(&[], &[], &base, value))
            }

            /// Zero value with the given batch layout.
            pub fn zeros(dynamic_sizes: &[usize], intmd_sizes: &[usize]) -> Self {
                let base = <$shape as StaticShape>::to_vec();
                $name(Tensor::zeros(dynamic_sizes, intmd_sizes, &base))
            }
        }

        impl Deref for $name {
            type Target = Tensor;

            fn deref(&self) -> &Tensor {
                &self.0
            }
        }

        impl From<$name> for Tensor {
            fn from(value: $name) -> Tensor {
                value.0
            }
        }
    };
}

define_primitive!(
    /// An unshaped scalar.
    Scalar,
    Shape0D,
    "Scalar"
);
define_primitive!(
    /// A 3-vector.
    Vec3,
    Shape1D<U3>,
    "Vec"
);
define_primitive!(
    /// A full second order tensor.
    R2,
    Shape2D<U3, U3>,
    "R2"
);
define_primitive!(
    /// A symmetric second order tensor in Mandel notation.
    SR2,
    Shape1D<U6>,
    "SR2"
);
define_primitive!(
    /// A symmetric fourth order tensor with minor symmetries, in Mandel
    /// notation.
    SSR4,
    Shape2D<U6, U6>,
    "SSR4"
);
define_primitive!(
    /// A rotation in modified Rodrigues parameterization.
    Rot,
    Shape1D<U3>,
    "Rot"
);
define_primitive!(
    /// A unit quaternion (w, x, y, z).
    Quaternion,
    Shape1D<U4>,
    "Quaternion"
);

impl Scalar {
    pub fn from_value(value: f64) -> Self {
        Scalar(Tensor::scalar(value))
    }
}

/// Multiplies a tensor by a scalar-valued tensor, broadcasting the
/// scalar over the base dimensions.
pub fn scalar_mul(s: &Tensor, t: &Tensor) -> Result<Tensor> {
    if !s.base_sizes().is_empty() {
        return Err(MateriaError::shape(format!(
            "scalar_mul expects a scalar-based tensor, got base shape {:?}",
            s.base_sizes()
        )));
    }
    let ones = vec![1; t.base_dim()];
    s.base_reshape(&ones)?.base_expand(t.base_sizes())?.mul(t)
}

const SQRT2: f64 = std::f64::consts::SQRT_2;

impl SR2 {
    /// Unbatched value from engineering components
    /// `(xx, yy, zz, yz, xz, xy)`.
    pub fn from_components(xx: f64, yy: f64, zz: f64, yz: f64, xz: f64, xy: f64) -> Self {
        SR2(Tensor::from_data(
            vec![xx, yy, zz, SQRT2 * yz, SQRT2 * xz, SQRT2 * xy],
            &[],
            &[],
            &[6],
        )
        .expect("six components always fill an SR2"))
    }

    /// The identity (unit spherical) tensor.
    pub fn identity() -> Self {
        SR2(Tensor::from_data(vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0], &[], &[], &[6])
            .expect("six components always fill an SR2"))
    }

    /// Trace.
    pub fn tr(&self) -> Result<Scalar> {
        Ok(Scalar(self.0.base_narrow(0, 0, 3)?.base_sum(0)?))
    }

    /// Volumetric part, `tr / 3 * I`.
    pub fn vol(&self) -> Result<SR2> {
        let mean = self.tr()?.into_tensor().mul_scalar(1.0 / 3.0);
        Ok(SR2(scalar_mul(&mean, &SR2::identity().into_tensor())?))
    }

    /// Deviatoric part.
    pub fn dev(&self) -> Result<SR2> {
        Ok(SR2(self.0.sub(&self.vol()?.into_tensor())?))
    }

    /// The full (unsymmetrized storage) second order tensor.
    pub fn to_full(&self) -> Result<R2> {
        let m = mandel_to_full_map();
        Ok(R2(super::linear_algebra::mv(&m, &self.0)?.base_reshape(&[3, 3])?))
    }

    /// Symmetrizes a full second order tensor into Mandel storage.
    pub fn from_full(full: &R2) -> Result<SR2> {
        let m = full_to_mandel_map();
        let flat = full.tensor().base_reshape(&[9])?;
        Ok(SR2(super::linear_algebra::mv(&m, &flat)?))
    }
}

/// The constant (9 x 6) map from Mandel storage to the row-major full
/// tensor.
fn mandel_to_full_map() -> Tensor {
    let s = 1.0 / SQRT2;
    // Rows: (xx, xy, xz, yx, yy, yz, zx, zy, zz).
    let rows: [[f64; 6]; 9] = [
        [1.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, s],
        [0.0, 0.0, 0.0, 0.0, s, 0.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, s],
        [0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, s, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, s, 0.0],
        [0.0, 0.0, 0.0, s, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
    ];
    let data: Vec<f64> = rows.iter().flatten().copied().collect();
    Tensor::from_data(data, &[], &[], &[9, 6]).expect("constant map has a fixed shape")
}

/// The constant (6 x 9) map from a row-major full tensor to Mandel
/// storage, symmetrizing.
fn full_to_mandel_map() -> Tensor {
    let h = 0.5 * SQRT2;
    let rows: [[f64; 9]; 6] = [
        [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0, 0.0, 0.0, h, 0.0, h, 0.0],
        [0.0, 0.0, h, 0.0, 0.0, 0.0, h, 0.0, 0.0],
        [0.0, h, 0.0, h, 0.0, 0.0, 0.0, 0.0, 0.0],
    ];
    let data: Vec<f64> = rows.iter().flatten().copied().collect();
    Tensor::from_data(data, &[], &[], &[6, 9]).expect("constant map has a fixed shape")
}

impl SSR4 {
    /// The identity operator on symmetric second order tensors.
    pub fn identity_sym() -> Self {
        SSR4(Tensor::base_eye(6))
    }

    /// The volumetric projector `I (x) I / 3`.
    pub fn identity_vol() -> Self {
        let i = SR2::identity();
        let outer = super::linear_algebra::einsum("...i,...j->...ij", &[i.tensor(), i.tensor()])
            .expect("outer product of constants cannot fail");
        SSR4(outer.mul_scalar(1.0 / 3.0))
    }

    /// The deviatoric projector.
    pub fn identity_dev() -> Self {
        let vol = Self::identity_vol();
        SSR4(
            Self::identity_sym()
                .into_tensor()
                .sub(&vol.into_tensor())
                .expect("constant operators share base shapes"),
        )
    }

    /// The isotropic stiffness for Young's modulus `e` and Poisson's
    /// ratio `nu`, `3 K J + 2 G K_dev`.
    pub fn isotropic_e_nu(e: &Scalar, nu: &Scalar) -> Result<SSR4> {
        let one = Tensor::scalar(1.0);
        let three_k = e
            .tensor()
            .div(&one.sub(&nu.tensor().mul_scalar(2.0))?)?;
        let two_g = e.tensor().div(&one.add(&nu.tensor())?)?;

        let vol = scalar_mul(&three_k, &Self::identity_vol().into_tensor())?;
        let dev = scalar_mul(&two_g, &Self::identity_dev().into_tensor())?;
        Ok(SSR4(vol.add(&dev)?))
    }

    /// Applies the operator to a symmetric second order tensor.
    pub fn apply(&self, s: &SR2) -> Result<SR2> {
        Ok(SR2(super::linear_algebra::mv(&self.0, s.tensor())?))
    }
}

impl Vec3 {
    pub fn from_values(x: f64, y: f64, z: f64) -> Self {
        Vec3(Tensor::from_data(vec![x, y, z], &[], &[], &[3])
            .expect("three components always fill a Vec"))
    }

    /// Dot product.
    pub fn dot(&self, other: &Vec3) -> Result<Scalar> {
        Ok(Scalar(
            super::linear_algebra::einsum("...i,...i->...", &[&self.0, &other.0])?,
        ))
    }
}

impl R2 {
    pub fn identity() -> Self {
        R2(Tensor::base_eye(3))
    }

    /// Applies the tensor to a vector.
    pub fn apply(&self, v: &Vec3) -> Result<Vec3> {
        Ok(Vec3(super::linear_algebra::mv(&self.0, v.tensor())?))
    }
}

impl Rot {
    /// The identity rotation.
    pub fn identity() -> Self {
        Rot(Tensor::zeros(&[], &[], &[3]))
    }

    /// Rotation of angle `angle` about the (normalized) `axis`, in the
    /// modified Rodrigues parameterization `r = tan(angle / 4) n`.
    pub fn from_axis_angle(axis: &Vec3, angle: f64) -> Result<Rot> {
        let t = (angle / 4.0).tan();
        Ok(Rot(axis.tensor().mul_scalar(t)))
    }

    /// The rotation matrix.
    ///
    /// With `W` the skew matrix of `r` and `s = |r|^2`:
    /// `R = I + 4 (1 - s) / (1 + s)^2 W + 8 / (1 + s)^2 W^2`.
    pub fn to_matrix(&self) -> Result<R2> {
        let r = &self.0;
        let s = super::linear_algebra::einsum("...i,...i->...", &[r, r])?;
        let denom = s.add_scalar(1.0).pow_scalar(2.0);

        let w = skew_matrix(r)?;
        let w2 = super::linear_algebra::mm(&w, &w)?;

        let c1 = s.neg().add_scalar(1.0).mul_scalar(4.0).div(&denom)?;
        let c2 = denom.pow_scalar(-1.0).mul_scalar(8.0);

        let eye = Tensor::base_eye(3);
        let term1 = scalar_mul(&c1, &w)?;
        let term2 = scalar_mul(&c2, &w2)?;
        Ok(R2(eye.add(&term1)?.add(&term2)?))
    }

    /// Rotates a vector.
    pub fn rotate(&self, v: &Vec3) -> Result<Vec3> {
        self.to_matrix()?.apply(v)
    }

    /// Rotates a symmetric second order tensor.
    pub fn rotate_sr2(&self, s: &SR2) -> Result<SR2> {
        let q = self.to_matrix()?;
        let full = s.to_full()?;
        let rotated = super::linear_algebra::einsum(
            "...ik,...kl,...jl->...ij",
            &[q.tensor(), full.tensor(), q.tensor()],
        )?;
        SR2::from_full(&R2::from_tensor(rotated)?)
    }
}

/// The skew matrix of a 3-vector.
fn skew_matrix(r: &Tensor) -> Result<Tensor> {
    // Rows of W from components via a constant (9 x 3) map.
    let rows: [[f64; 3]; 9] = [
        [0.0, 0.0, 0.0],
        [0.0, 0.0, -1.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0],
        [-1.0, 0.0, 0.0],
        [0.0, -1.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 0.0, 0.0],
    ];
    let data: Vec<f64> = rows.iter().flatten().copied().collect();
    let map = Tensor::from_data(data, &[], &[], &[9, 3])?;
    super::linear_algebra::mv(&map, r)?.base_reshape(&[3, 3])
}

impl Quaternion {
    pub fn identity() -> Self {
        Quaternion(
            Tensor::from_data(vec![1.0, 0.0, 0.0, 0.0], &[], &[], &[4])
                .expect("four components always fill a Quaternion"),
        )
    }

    /// The rotation matrix of a unit quaternion `(w, x, y, z)`.
    pub fn to_matrix(&self) -> Result<R2> {
        let q = self.0.data();
        if self.0.batch_dim() != 0 {
            return Err(MateriaError::unsupported(
                "batched quaternion rotation matrices are not implemented",
            ));
        }
        let (w, x, y, z) = (q[0], q[1], q[2], q[3]);
        let data = vec![
            1.0 - 2.0 * (y * y + z * z),
            2.0 * (x * y - w * z),
            2.0 * (x * z + w * y),
            2.0 * (x * y + w * z),
            1.0 - 2.0 * (x * x + z * z),
            2.0 * (y * z - w * x),
            2.0 * (x * z - w * y),
            2.0 * (y * z + w * x),
            1.0 - 2.0 * (x * x + y * y),
        ];
        R2::from_tensor(Tensor::from_data(data, &[], &[], &[3, 3])?)
    }

    /// Rotates a vector.
    pub fn rotate(&self, v: &Vec3) -> Result<Vec3> {
        self.to_matrix()?.apply(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn type_names_and_base_shapes() {
        assert_eq!(Scalar::TYPE_NAME, "Scalar");
        assert_eq!(Scalar::const_base_sizes(), Vec::<usize>::new());
        assert_eq!(Vec3::const_base_sizes(), vec![3]);
        assert_eq!(R2::const_base_sizes(), vec![3, 3]);
        assert_eq!(SR2::const_base_sizes(), vec![6]);
        assert_eq!(SSR4::const_base_sizes(), vec![6, 6]);
        assert_eq!(Quaternion::const_base_sizes(), vec![4]);
    }

    #[test]
    fn from_tensor_checks_base() {
        assert!(SR2::from_tensor(Tensor::zeros(&[], &[], &[6])).is_ok());
        assert!(SR2::from_tensor(Tensor::zeros(&[], &[], &[5])).is_err());
    }

    #[test]
    fn trace_and_split() {
        let s = SR2::from_components(1.0, 2.0, 3.0, 0.5, 0.6, 0.7);
        assert_relative_eq!(s.tr().unwrap().item().unwrap(), 6.0);

        let vol = s.vol().unwrap();
        let dev = s.dev().unwrap();
        assert_relative_eq!(vol.tr().unwrap().item().unwrap(), 6.0, epsilon = 1e-12);
        assert_relative_eq!(dev.tr().unwrap().item().unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn mandel_roundtrip() {
        let s = SR2::from_components(1.0, 2.0, 3.0, 0.5, 0.6, 0.7);
        let full = s.to_full().unwrap();
        assert_relative_eq!(full.tensor().at(&[0, 0]), 1.0);
        assert_relative_eq!(full.tensor().at(&[1, 2]), 0.5);
        assert_relative_eq!(full.tensor().at(&[2, 1]), 0.5);

        let back = SR2::from_full(&full).unwrap();
        for (a, b) in back.tensor().data().iter().zip(s.tensor().data()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn isotropic_stiffness_uniaxial() {
        let e = Scalar::from_value(100.0);
        let nu = Scalar::from_value(0.3);
        let c = SSR4::isotropic_e_nu(&e, &nu).unwrap();

        // Pure hydrostatic strain responds with 3 K tr / 3.
        let strain = SR2::from_components(0.01, 0.01, 0.01, 0.0, 0.0, 0.0);
        let stress = c.apply(&strain).unwrap();
        let k = 100.0 / (3.0 * (1.0 - 2.0 * 0.3));
        assert_relative_eq!(
            stress.tensor().data()[0],
            3.0 * k * 0.01,
            epsilon = 1e-10
        );
    }

    #[test]
    fn rotation_identity() {
        let r = Rot::identity();
        let v = Vec3::from_values(1.0, 2.0, 3.0);
        let rotated = r.rotate(&v).unwrap();
        for (a, b) in rotated.tensor().data().iter().zip(v.tensor().data()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn rotation_quarter_turn() {
        let axis = Vec3::from_values(0.0, 0.0, 1.0);
        let r = Rot::from_axis_angle(&axis, std::f64::consts::FRAC_PI_2).unwrap();
        let v = Vec3::from_values(1.0, 0.0, 0.0);
        let rotated = r.rotate(&v).unwrap();
        assert_relative_eq!(rotated.tensor().data()[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(rotated.tensor().data()[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(rotated.tensor().data()[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn quaternion_matches_rodrigues() {
        let half = std::f64::consts::FRAC_PI_4;
        let q = Quaternion::from_tensor(
            Tensor::from_data(vec![half.cos(), 0.0, 0.0, half.sin()], &[], &[], &[4]).unwrap(),
        )
        .unwrap();
        let v = Vec3::from_values(1.0, 0.0, 0.0);
        let rotated = q.rotate(&v).unwrap();
        assert_relative_eq!(rotated.tensor().data()[1], 1.0, epsilon = 1e-12);
    }
}

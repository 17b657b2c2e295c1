//! `fem` is the minimal discretization glue: scattering a global
//! degree-of-freedom vector to element-local layouts, interpolating to
//! quadrature points with a basis, and assembling element quantities
//! back into a global vector.
//!
//! The degree-of-freedom map is a static index list with element-local
//! shape `(ndofe, nvar)` per element; everything is expressed with the
//! tensor engine's gather/scatter-add and Einstein-summation
//! primitives, so these kernels trace and differentiate like any other
//! operation. The mesh extents (`nelem`, `ndofe`, `nvar`, `ndof`) come
//! from the dof map and are captured as constants by a trace, so a
//! captured graph serves one mesh.

use crate::errors::{MateriaError, Result};
use crate::tensor::{einsum, Group, Tensor};

/// A degree-of-freedom map: for each element, the global index of each
/// (element-local node, variable) pair.
#[derive(Debug, Clone)]
pub struct DofMap {
    indices: Vec<usize>,
    nelem: usize,
    ndofe: usize,
    nvar: usize,
}

impl DofMap {
    /// Builds a map from flat indices in `(nelem, ndofe, nvar)` order.
    pub fn new(indices: Vec<usize>, nelem: usize, ndofe: usize, nvar: usize) -> Result<Self> {
        if indices.len() != nelem * ndofe * nvar {
            return Err(MateriaError::shape(format!(
                "a dof map for {} elements with {} local dofs and {} variables needs {} \
                 indices, got {}",
                nelem,
                ndofe,
                nvar,
                nelem * ndofe * nvar,
                indices.len()
            )));
        }
        Ok(DofMap {
            indices,
            nelem,
            ndofe,
            nvar,
        })
    }

    pub fn nelem(&self) -> usize {
        self.nelem
    }

    pub fn ndofe(&self) -> usize {
        self.ndofe
    }

    pub fn nvar(&self) -> usize {
        self.nvar
    }
}

/// Scatters a global vector of degrees of freedom to the element-local
/// layout described by the dof map.
///
/// The input has base shape `(ndof,)`; the result is element-batched
/// with base shape `(ndofe, nvar)`.
pub fn scatter(v: &Tensor, dof_map: &DofMap) -> Result<Tensor> {
    if v.base_dim() != 1 {
        return Err(MateriaError::shape(format!(
            "scatter expects a vector of degrees of freedom, got base shape {:?}",
            v.base_sizes()
        )));
    }
    let gathered = v.index_select(Group::Base, 0, &dof_map.indices)?;

    let mut full = gathered.dynamic_sizes().to_vec();
    full.extend_from_slice(&[dof_map.nelem, dof_map.ndofe, dof_map.nvar]);
    gathered.reshape_full(&full, gathered.dynamic_dim() + 1, 0)
}

/// Gathers element-local nodal values back to a global vector,
/// averaging the contributions of shared degrees of freedom.
pub fn gather(field: &Tensor, dof_map: &DofMap, ndof: usize) -> Result<Tensor> {
    let summed = assemble(field, dof_map, ndof)?;
    let mut counts = vec![0.0; ndof];
    for i in &dof_map.indices {
        counts[*i] += 1.0;
    }
    let counts = Tensor::from_data(counts, &[], &[], &[ndof])?;
    summed.div(&counts)
}

/// Interpolates element-local nodal values to quadrature points.
///
/// `u` has base shape `(ndofe, nvar)`. With a basis of base shape
/// `(ndofe, nqp)` the result has base shape `(nvar, nqp)`; with a basis
/// gradient of base shape `(ndofe, nqp, ndim)` the result has base
/// shape `(nvar, nqp, ndim)`.
pub fn interpolate(u: &Tensor, phi: &Tensor) -> Result<Tensor> {
    match phi.base_dim() {
        2 => einsum("...dv,...dq->...vq", &[u, phi]),
        3 => einsum("...dv,...dqm->...vqm", &[u, phi]),
        _ => Err(MateriaError::shape(format!(
            "interpolate expects a basis with base shape (ndofe, nqp) or (ndofe, nqp, ndim), \
             got {:?}",
            phi.base_sizes()
        ))),
    }
}

/// Assembles element-local quantities into a global vector of length
/// `ndof`, adding the contributions of shared degrees of freedom.
///
/// The input is element-batched with base shape `(ndofe, nvar)`.
pub fn assemble(re: &Tensor, dof_map: &DofMap, ndof: usize) -> Result<Tensor> {
    if re.base_sizes() != [dof_map.ndofe, dof_map.nvar] {
        return Err(MateriaError::shape(format!(
            "assemble expects element quantities with base shape ({}, {}), got {:?}",
            dof_map.ndofe,
            dof_map.nvar,
            re.base_sizes()
        )));
    }
    if re.dynamic_dim() == 0 || re.dynamic_sizes()[re.dynamic_dim() - 1] != dof_map.nelem {
        return Err(MateriaError::shape(format!(
            "assemble expects a trailing element batch of extent {}, got dynamic shape {:?}",
            dof_map.nelem,
            re.dynamic_sizes()
        )));
    }
    let nelem_dim = re.dynamic_dim() - 1;

    // Fold the element batch into the base, then scatter-add by index.
    let leading = &re.dynamic_sizes()[..nelem_dim];
    let flat_len = dof_map.nelem * dof_map.ndofe * dof_map.nvar;
    let mut full = leading.to_vec();
    full.push(flat_len);
    let flat = re.reshape_full(&full, nelem_dim, 0)?;
    flat.index_add(Group::Base, 0, ndof, &dof_map.indices)
}

/// The total number of degrees of freedom a map refers to must be at
/// least this large.
pub fn min_ndof(dof_map: &DofMap) -> usize {
    dof_map.indices.iter().copied().max().map_or(0, |m| m + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// A 1D mesh with two 2-node elements and one variable:
    /// 0 --- 1 --- 2
    fn line_mesh() -> DofMap {
        DofMap::new(vec![0, 1, 1, 2], 2, 2, 1).unwrap()
    }

    #[test]
    fn scatter_gathers_by_index() {
        let sol = Tensor::from_data(vec![10.0, 20.0, 30.0], &[], &[], &[3]).unwrap();
        let scattered = scatter(&sol, &line_mesh()).unwrap();
        assert_eq!(scattered.dynamic_sizes(), &[2]);
        assert_eq!(scattered.base_sizes(), &[2, 1]);
        assert_eq!(scattered.data(), &[10.0, 20.0, 20.0, 30.0]);
    }

    #[test]
    fn assemble_adds_shared_dofs() {
        let sol = Tensor::from_data(vec![10.0, 20.0, 30.0], &[], &[], &[3]).unwrap();
        let map = line_mesh();
        let scattered = scatter(&sol, &map).unwrap();
        let assembled = assemble(&scattered, &map, 3).unwrap();
        // The shared middle node accumulates both element contributions.
        assert_eq!(assembled.data(), &[10.0, 40.0, 30.0]);

        let averaged = gather(&scattered, &map, 3).unwrap();
        assert_eq!(averaged.data(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn interpolate_midpoint() {
        // One-point quadrature at the element midpoint with linear
        // basis: phi has base shape (2, 1) with both entries 1/2.
        let map = line_mesh();
        let sol = Tensor::from_data(vec![0.0, 2.0, 4.0], &[], &[], &[3]).unwrap();
        let scattered = scatter(&sol, &map).unwrap();
        let phi = Tensor::from_data(vec![0.5, 0.5], &[], &[], &[2, 1]).unwrap();

        let interp = interpolate(&scattered, &phi).unwrap();
        assert_eq!(interp.base_sizes(), &[1, 1]);
        assert_relative_eq!(interp.data()[0], 1.0);
        assert_relative_eq!(interp.data()[1], 3.0);
    }

    #[test]
    fn dof_bounds() {
        assert_eq!(min_ndof(&line_mesh()), 3);
        assert!(DofMap::new(vec![0, 1], 2, 2, 1).is_err());
    }
}

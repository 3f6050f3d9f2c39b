//! Domain-decomposed finite element solver for the chameleon screened scalar field.
//!
//! The field satisfies the nonlinear Klein-Gordon type equation
//! <div>$$
//!   \alpha \Delta \phi = \rho - \phi^{-(n+1)}
//! $$</div>
//! on an unbounded domain. The domain is split into a bounded interior mesh and an exterior
//! mesh that is compactified by Kelvin inversion. The two sub-problems are solved with Newton
//! iterations and coupled through their shared interface until the interface traces agree.
use nalgebra::{DimMin, DimName};

pub mod allocators;
pub mod assembly;
pub mod config;
pub mod element;
pub mod error;
pub mod io;
pub mod matching;
pub mod mesh;
pub mod monitor;
pub mod physics;
pub mod quadrature;
pub mod solver;
pub mod weak_form;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
pub extern crate vtkio;

/// A small, fixed-size dimension.
///
/// Used as a trait alias for various traits frequently needed by generic routines.
pub trait SmallDim: DimName + DimMin<Self, Output = Self> {}

impl<D> SmallDim for D where D: DimName + DimMin<Self, Output = Self> {}

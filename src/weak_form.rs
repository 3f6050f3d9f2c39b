//! Declarative description of one sub-domain's variational problem.
//!
//! A [`WeakFormSpec`] binds the dimensionless field equation
//! <div>$$
//!   \int \alpha \nabla u \cdot \nabla v \, w_K + \int \left(\rho - f(u)\right) v \, w_M = 0
//! $$</div>
//! to a mesh, where $w_K$ and $w_M$ combine the measure of the coordinate system with the
//! Jacobian weights of the domain mapping, and $f$ is the nonlinear term.
use crate::allocators::DimAllocator;
use crate::element::{simplex_node_count, SimplexElement};
use crate::error::{FormError, UnknownRegionError};
use crate::mesh::{Mesh, RegionTag};
use crate::physics::PhysicalParameters;
use crate::SmallDim;
use nalgebra::{DefaultAllocator, OPoint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Coordinate system in which the mesh coordinates are interpreted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Plain Cartesian coordinates in the dimension of the mesh.
    Cartesian,
    /// Axisymmetric coordinates $(\rho, z)$ of a three-dimensional problem.
    Cylindrical,
    /// Radial coordinate $r$ of a spherically symmetric three-dimensional problem.
    Spherical,
}

impl CoordinateSystem {
    pub fn name(&self) -> &'static str {
        match self {
            CoordinateSystem::Cartesian => "cartesian",
            CoordinateSystem::Cylindrical => "cylindrical",
            CoordinateSystem::Spherical => "spherical",
        }
    }

    /// Whether the coordinate system is defined for meshes of the given dimension.
    pub fn supports_mesh_dim(&self, dim: usize) -> bool {
        match self {
            CoordinateSystem::Cartesian => (1..=3).contains(&dim),
            CoordinateSystem::Cylindrical => dim == 2,
            CoordinateSystem::Spherical => dim == 1,
        }
    }

    /// Dimension of the physical space the problem lives in.
    pub fn effective_dim(&self, mesh_dim: usize) -> usize {
        match self {
            CoordinateSystem::Cartesian => mesh_dim,
            CoordinateSystem::Cylindrical | CoordinateSystem::Spherical => 3,
        }
    }

    /// Volume measure density, up to constant angular factors.
    pub fn measure<D>(&self, x: &OPoint<f64, D>) -> f64
    where
        D: SmallDim,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        match self {
            CoordinateSystem::Cartesian => 1.0,
            CoordinateSystem::Cylindrical => x[0].abs(),
            CoordinateSystem::Spherical => x[0] * x[0],
        }
    }
}

/// How mesh coordinates relate to physical coordinates.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainMapping {
    /// Mesh coordinates are physical coordinates.
    Bounded,
    /// Kelvin inversion $x = R^2 \xi / |\xi|^2$ mapping the ball $|\xi| \leq R$ onto the
    /// exterior $|x| \geq R$. The origin of the mesh is the point at infinity.
    Inverted { radius: f64 },
}

impl DomainMapping {
    /// The factor $\lambda = R^2 / |\xi|^2$ of the inversion, or one for bounded domains.
    fn scale<D>(&self, xi: &OPoint<f64, D>) -> f64
    where
        D: SmallDim,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        match *self {
            DomainMapping::Bounded => 1.0,
            DomainMapping::Inverted { radius } => radius * radius / xi.coords.norm_squared(),
        }
    }

    /// Maps mesh coordinates to physical coordinates.
    ///
    /// Returns `None` for the image of the point at infinity.
    pub fn physical_point<D>(&self, xi: &OPoint<f64, D>) -> Option<OPoint<f64, D>>
    where
        D: SmallDim,
        DefaultAllocator: DimAllocator<f64, D>,
    {
        match *self {
            DomainMapping::Bounded => Some(xi.clone()),
            DomainMapping::Inverted { .. } => {
                let norm_squared = xi.coords.norm_squared();
                (norm_squared > 0.0).then(|| OPoint::from(&xi.coords * self.scale(xi)))
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormRole {
    /// The form is solved for the field.
    Governing,
    /// The form only evaluates how far a field is from satisfying the equation.
    Residual,
}

/// Density coefficient of a weak form.
#[derive(Debug, Clone, PartialEq)]
pub enum Density {
    Uniform(f64),
    PerRegion(BTreeMap<RegionTag, f64>),
}

/// The nonlinear term $f(u)$ on the right-hand side of $\alpha \Delta u = \rho - f(u)$.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum NonlinearTerm {
    /// The chameleon potential term $f(u) = u^{-(n+1)}$, defined for $u > 0$.
    Chameleon { npot: u32 },
    /// A linear screening term $f(u) = -c u$.
    Linear { coefficient: f64 },
}

impl NonlinearTerm {
    pub fn value(&self, u: f64) -> f64 {
        match *self {
            NonlinearTerm::Chameleon { npot } => u.powi(-(npot as i32 + 1)),
            NonlinearTerm::Linear { coefficient } => -coefficient * u,
        }
    }

    pub fn derivative(&self, u: f64) -> f64 {
        match *self {
            NonlinearTerm::Chameleon { npot } => -((npot + 1) as f64) * u.powi(-(npot as i32 + 2)),
            NonlinearTerm::Linear { coefficient } => -coefficient,
        }
    }

    /// Antiderivative $F$ of $-f$, so that the energy density is $\rho u + F(u)$.
    pub fn potential(&self, u: f64) -> f64 {
        match *self {
            NonlinearTerm::Chameleon { npot } => u.powi(-(npot as i32)) / npot as f64,
            NonlinearTerm::Linear { coefficient } => 0.5 * coefficient * u * u,
        }
    }

    /// Whether the field must stay strictly positive for the term to be defined.
    pub fn requires_positive_field(&self) -> bool {
        matches!(self, NonlinearTerm::Chameleon { .. })
    }

    /// The constant field solving $f(u) = \rho$, if any.
    pub fn equilibrium(&self, density: f64) -> Option<f64> {
        match *self {
            NonlinearTerm::Chameleon { npot } if density > 0.0 => Some(density.powf(-1.0 / (npot + 1) as f64)),
            NonlinearTerm::Linear { coefficient } if coefficient != 0.0 => Some(-density / coefficient),
            _ => None,
        }
    }
}

/// Immutable description of a sub-domain problem.
///
/// Built once per sub-domain with [`WeakFormSpec::builder`]. Boundary values on the coupling
/// interface are supplied by the solver at solve time and never stored in the form.
#[derive(Debug, Clone)]
pub struct WeakFormSpec<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    name: String,
    field: String,
    role: FormRole,
    mesh: Arc<Mesh<D>>,
    coordinates: CoordinateSystem,
    mapping: DomainMapping,
    element_order: usize,
    alpha: f64,
    density: Density,
    cell_density: Vec<f64>,
    essential_bcs: BTreeMap<RegionTag, f64>,
    nonlinear_term: NonlinearTerm,
}

impl<D> WeakFormSpec<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    pub fn builder(name: impl Into<String>, mesh: Arc<Mesh<D>>) -> WeakFormBuilder<D> {
        WeakFormBuilder {
            name: name.into(),
            field: "phi".to_string(),
            role: FormRole::Governing,
            mesh,
            coordinates: None,
            mapping: DomainMapping::Bounded,
            element_order: None,
            density: None,
            essential_bcs: BTreeMap::new(),
            nonlinear_term: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_name(&self) -> &str {
        &self.field
    }

    pub fn role(&self) -> FormRole {
        self.role
    }

    pub fn mesh(&self) -> &Arc<Mesh<D>> {
        &self.mesh
    }

    pub fn dim(&self) -> usize {
        D::dim()
    }

    pub fn coordinates(&self) -> CoordinateSystem {
        self.coordinates
    }

    pub fn mapping(&self) -> DomainMapping {
        self.mapping
    }

    pub fn element_order(&self) -> usize {
        self.element_order
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn density(&self) -> &Density {
        &self.density
    }

    /// Density of the given cell.
    pub fn cell_density(&self, cell: usize) -> f64 {
        self.cell_density[cell]
    }

    pub fn cell_densities(&self) -> &[f64] {
        &self.cell_density
    }

    pub fn essential_bcs(&self) -> &BTreeMap<RegionTag, f64> {
        &self.essential_bcs
    }

    pub fn nonlinear_term(&self) -> NonlinearTerm {
        self.nonlinear_term
    }

    /// Essential boundary values per degree of freedom.
    ///
    /// Nodes shared by several regions take the value of the region that sorts last.
    pub fn essential_dofs(&self) -> BTreeMap<usize, f64> {
        let mut dofs = BTreeMap::new();
        for (&tag, &value) in &self.essential_bcs {
            // Existence was validated at construction
            for node in self.mesh.region_nodes(tag).unwrap_or_default() {
                dofs.insert(node, value);
            }
        }
        dofs
    }

    /// Weight of the stiffness term at the given mesh point.
    ///
    /// For inverted domains the Dirichlet energy transforms with $\lambda^{d-2}$, where $d$ is the
    /// effective dimension of the problem.
    pub fn stiffness_weight(&self, x: &OPoint<f64, D>) -> f64 {
        let measure = self.coordinates.measure(x);
        match self.mapping {
            DomainMapping::Bounded => measure,
            DomainMapping::Inverted { .. } => {
                let d = self.coordinates.effective_dim(D::dim()) as i32;
                measure * self.mapping.scale(x).powi(d - 2)
            }
        }
    }

    /// Weight of the mass and source terms at the given mesh point.
    ///
    /// For inverted domains the volume element transforms with $\lambda^d$.
    pub fn mass_weight(&self, x: &OPoint<f64, D>) -> f64 {
        let measure = self.coordinates.measure(x);
        match self.mapping {
            DomainMapping::Bounded => measure,
            DomainMapping::Inverted { .. } => {
                let d = self.coordinates.effective_dim(D::dim()) as i32;
                measure * self.mapping.scale(x).powi(d)
            }
        }
    }
}

/// Builder for [`WeakFormSpec`], validated against the mesh by [`WeakFormBuilder::build`].
#[derive(Debug, Clone)]
pub struct WeakFormBuilder<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    name: String,
    field: String,
    role: FormRole,
    mesh: Arc<Mesh<D>>,
    coordinates: Option<CoordinateSystem>,
    mapping: DomainMapping,
    element_order: Option<usize>,
    density: Option<Density>,
    essential_bcs: BTreeMap<RegionTag, f64>,
    nonlinear_term: Option<NonlinearTerm>,
}

impl<D> WeakFormBuilder<D>
where
    D: SmallDim,
    DefaultAllocator: DimAllocator<f64, D>,
{
    pub fn field_name(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn role(mut self, role: FormRole) -> Self {
        self.role = role;
        self
    }

    /// Overrides the coordinate system of the physical parameters.
    pub fn coordinates(mut self, coordinates: CoordinateSystem) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    pub fn mapping(mut self, mapping: DomainMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Requires the given element order. Defaults to the order of the mesh.
    pub fn element_order(mut self, order: usize) -> Self {
        self.element_order = Some(order);
        self
    }

    /// Overrides the densities of the physical parameters.
    pub fn density(mut self, density: Density) -> Self {
        self.density = Some(density);
        self
    }

    pub fn essential_bc(mut self, tag: RegionTag, value: f64) -> Self {
        self.essential_bcs.insert(tag, value);
        self
    }

    /// Overrides the chameleon term implied by the physical parameters.
    pub fn nonlinear_term(mut self, term: NonlinearTerm) -> Self {
        self.nonlinear_term = Some(term);
        self
    }

    fn unknown(&self, tag: RegionTag) -> FormError {
        FormError::UnknownRegion(UnknownRegionError {
            form: self.name.clone(),
            tag,
        })
    }

    /// Validates the description against the mesh and the physical parameters.
    ///
    /// Densities default to the per-region densities of the parameters, or to the vacuum density
    /// if the parameters declare none. The nonlinear term defaults to the chameleon term with the
    /// exponent of the parameters.
    pub fn build(self, params: &PhysicalParameters) -> Result<WeakFormSpec<D>, FormError> {
        params.validate()?;
        let dim = D::dim();

        let element_order = self.element_order.unwrap_or(self.mesh.order());
        if simplex_node_count(dim, element_order).is_none() {
            return Err(FormError::UnsupportedElementOrder {
                form: self.name.clone(),
                order: element_order,
            });
        }
        if element_order != self.mesh.order() {
            return Err(FormError::ElementOrderMismatch {
                form: self.name.clone(),
                order: element_order,
                mesh_order: self.mesh.order(),
            });
        }

        let coordinates = self.coordinates.unwrap_or(params.coordinates);
        if !coordinates.supports_mesh_dim(dim) {
            return Err(FormError::IncompatibleCoordinates {
                form: self.name.clone(),
                coordinates: coordinates.name(),
                dim,
            });
        }

        if let DomainMapping::Inverted { radius } = self.mapping {
            if !(radius.is_finite() && radius > 0.0) {
                return Err(FormError::InvalidParameter {
                    name: "inversion radius",
                    value: radius,
                });
            }
        }

        let density = self.density.clone().unwrap_or_else(|| {
            if params.densities.is_empty() {
                Density::Uniform(params.rho_vac)
            } else {
                Density::PerRegion(params.densities.clone())
            }
        });

        let num_cells = self.mesh.num_cells();
        let cell_density = match &density {
            Density::Uniform(rho) => {
                check_density(*rho)?;
                vec![*rho; num_cells]
            }
            Density::PerRegion(map) => {
                let mut cell_density = vec![f64::NAN; num_cells];
                for (&tag, &rho) in map {
                    if !self.mesh.contains_region(tag) {
                        return Err(self.unknown(tag));
                    }
                    let RegionTag::Subdomain(id) = tag else {
                        return Err(FormError::InvalidRegionKind {
                            form: self.name.clone(),
                            tag,
                            expected: "subdomain",
                        });
                    };
                    check_density(rho)?;
                    for &cell in self.mesh.cell_region(id).unwrap_or_default() {
                        cell_density[cell] = rho;
                    }
                }
                let uncovered = cell_density.iter().filter(|rho| rho.is_nan()).count();
                if uncovered > 0 {
                    return Err(FormError::UncoveredCells {
                        form: self.name.clone(),
                        count: uncovered,
                    });
                }
                cell_density
            }
        };

        for (&tag, &value) in &self.essential_bcs {
            if !self.mesh.contains_region(tag) {
                return Err(self.unknown(tag));
            }
            if !value.is_finite() {
                return Err(FormError::InvalidParameter {
                    name: "essential boundary value",
                    value,
                });
            }
        }

        for (index, cell) in self.mesh.cells().enumerate() {
            let vertices: Vec<_> = cell
                .iter()
                .map(|&v| self.mesh.vertices()[v].clone())
                .collect();
            if SimplexElement::from_vertices(&vertices).is_none() {
                return Err(FormError::DegenerateCell {
                    form: self.name.clone(),
                    cell: index,
                });
            }
        }

        let nonlinear_term = self
            .nonlinear_term
            .unwrap_or(NonlinearTerm::Chameleon { npot: params.npot });

        Ok(WeakFormSpec {
            name: self.name,
            field: self.field,
            role: self.role,
            mesh: self.mesh,
            coordinates,
            mapping: self.mapping,
            element_order,
            alpha: params.alpha,
            density,
            cell_density,
            essential_bcs: self.essential_bcs,
            nonlinear_term,
        })
    }
}

fn check_density(rho: f64) -> Result<(), FormError> {
    if rho.is_finite() && rho >= 0.0 {
        Ok(())
    } else {
        Err(FormError::InvalidParameter {
            name: "density",
            value: rho,
        })
    }
}

//! Per-phase linearizations and assembly of the global equilibrium system.
//!
//! The equilibrium system has one row per stable composition set (free-stable first,
//! then pinned), one row per prescribed element and a final row for the total system
//! amount. Its columns are kept as separate blocks (chemical potentials, phase amounts,
//! state variables) so that both the Newton step and the dot derivatives can pick the
//! free columns they need and move the rest to the right-hand side.

use crate::composition_set::CompositionSet;
use crate::error::{SolverError, SolverResult};
use crate::system_spec::SystemSpecification;
use eq_models::PhaseRecord;
use nalgebra::{DMatrix, DVector, RowDVector};
use std::ops::AddAssign;
use tracing::trace;

/// Thermodynamic derivatives of one composition set at its current dof.
#[derive(Clone, Debug)]
pub(crate) struct PhaseLinearization {
    phase: String,
    num_statevars: usize,
    pub energy: f64,
    pub masses: DVector<f64>,
    pub grad: DVector<f64>,
    hess: DMatrix<f64>,
    mass_jac: DMatrix<f64>,
    cons_jac: DMatrix<f64>,
    cons_res: DVector<f64>,
}

/// Response of the site fractions of one phase to the global variables
/// (Sundman et al. 2015, Eq. 44).
#[derive(Clone, Debug)]
pub(crate) struct PhaseSensitivity {
    /// `−E·g_y`
    pub c_g: DVector<f64>,
    /// `−E·H_yv`, one column per state variable
    pub c_statevars: DMatrix<f64>,
    /// `M_y·E`, one row per component
    pub c_component: DMatrix<f64>,
    /// Mass Jacobian restricted to the site fractions
    pub mass_jac_y: DMatrix<f64>,
}

impl PhaseLinearization {
    pub fn evaluate(record: &dyn PhaseRecord, x: &[f64]) -> SolverResult<Self> {
        Ok(Self {
            phase: record.phase_name().to_string(),
            num_statevars: record.num_statevars(),
            energy: record.obj(x)?,
            masses: record.masses(x)?,
            grad: record.grad(x)?,
            hess: record.hess(x)?,
            mass_jac: record.mass_jac(x)?,
            cons_jac: record.internal_cons_jac(x)?,
            cons_res: record.internal_cons_func(x)?,
        })
    }

    pub fn of(compset: &CompositionSet) -> SolverResult<Self> {
        Self::evaluate(compset.phase_record().as_ref(), compset.dof.as_slice())
    }

    fn phase_dof(&self) -> usize {
        self.grad.len() - self.num_statevars
    }

    /// Bordered Hessian `[H_yy, C_yᵀ; C_y, 0]` (Sundman et al. 2015, Eq. 41).
    pub fn phase_matrix(&self) -> DMatrix<f64> {
        let nsv = self.num_statevars;
        let dof = self.phase_dof();
        let ncons = self.cons_jac.nrows();
        let mut m = DMatrix::zeros(dof + ncons, dof + ncons);
        m.view_mut((0, 0), (dof, dof))
            .copy_from(&self.hess.view((nsv, nsv), (dof, dof)));
        let c_y = self.cons_jac.view((0, nsv), (ncons, dof));
        m.view_mut((dof, 0), (ncons, dof)).copy_from(&c_y);
        m.view_mut((0, dof), (dof, ncons)).copy_from(&c_y.transpose());
        m
    }

    /// Site-fraction step of the internal Newton update for the given chemical
    /// potentials and pending state-variable step.
    pub fn internal_step(
        &self,
        chemical_potentials: &DVector<f64>,
        delta_statevars: &DVector<f64>,
    ) -> SolverResult<DVector<f64>> {
        let nsv = self.num_statevars;
        let dof = self.phase_dof();
        let ncons = self.cons_jac.nrows();

        let mut rhs = DVector::zeros(dof + ncons);
        let mut top = rhs.rows_mut(0, dof);
        top -= self.grad.rows(nsv, dof);
        top -= self.hess.view((nsv, 0), (dof, nsv)) * delta_statevars;
        top += self.mass_jac.view((0, nsv), (self.mass_jac.nrows(), dof)).transpose()
            * chemical_potentials;
        rhs.rows_mut(dof, ncons).copy_from(&(-&self.cons_res));

        let soln = self
            .phase_matrix()
            .lu()
            .solve(&rhs)
            .ok_or_else(|| SolverError::SingularPhaseMatrix {
                phase: self.phase.clone(),
            })?;
        Ok(soln.rows(0, dof).into_owned())
    }

    pub fn sensitivities(&self) -> SolverResult<PhaseSensitivity> {
        let nsv = self.num_statevars;
        let dof = self.phase_dof();
        let inverse = self.phase_matrix().try_inverse().ok_or_else(|| {
            SolverError::SingularPhaseMatrix {
                phase: self.phase.clone(),
            }
        })?;
        let e_matrix = inverse.view((0, 0), (dof, dof));
        let mass_jac_y = self
            .mass_jac
            .view((0, nsv), (self.mass_jac.nrows(), dof))
            .into_owned();
        Ok(PhaseSensitivity {
            c_g: -(e_matrix * self.grad.rows(nsv, dof)),
            c_statevars: -(e_matrix * self.hess.view((nsv, 0), (dof, nsv))),
            c_component: &mass_jac_y * e_matrix,
            mass_jac_y,
        })
    }

    /// Gradient of the energy with respect to the state variables.
    pub fn statevar_grad(&self) -> DVector<f64> {
        self.grad.rows(0, self.num_statevars).into_owned()
    }
}

/// A stable composition set taking part in the equilibrium system.
pub(crate) struct StableEntry<'a> {
    pub linearization: &'a PhaseLinearization,
    pub np: f64,
    /// Column of its amount, `None` for pinned composition sets.
    pub amount_column: Option<usize>,
}

/// Column blocks of the equilibrium system.
#[derive(Clone, Debug)]
pub(crate) struct EquilibriumSystem {
    /// rows × components
    pub chempot: DMatrix<f64>,
    /// rows × free-stable composition sets
    pub amount: DMatrix<f64>,
    /// rows × state variables
    pub statevar: DMatrix<f64>,
    /// Right-hand side without any fixed-potential or residual terms
    pub rhs: DVector<f64>,
    /// Per stable entry, in row order
    pub sensitivities: Vec<PhaseSensitivity>,
    pub num_phase_rows: usize,
}

impl EquilibriumSystem {
    pub fn assemble(
        spec: &SystemSpecification,
        entries: &[StableEntry<'_>],
    ) -> SolverResult<Self> {
        let ncomp = spec.num_components();
        let nsv = spec.num_statevars();
        let num_phase_rows = entries.len();
        let num_free_stable = entries.iter().filter(|e| e.amount_column.is_some()).count();
        let nrows = num_phase_rows + spec.num_fixed_components() + 1;
        let system_amount_row = nrows - 1;

        let mut chempot = DMatrix::zeros(nrows, ncomp);
        let mut amount = DMatrix::zeros(nrows, num_free_stable);
        let mut statevar = DMatrix::zeros(nrows, nsv);
        let mut rhs = DVector::zeros(nrows);
        let mut sensitivities = Vec::with_capacity(entries.len());

        for (row, entry) in entries.iter().enumerate() {
            let lin = entry.linearization;
            let sens = lin.sensitivities()?;

            // Phase row: μ·M − g_v·Δv = G
            chempot.row_mut(row).copy_from(&lin.masses.transpose());
            let grad_sv = lin.statevar_grad();
            for sv in 0..nsv {
                statevar[(row, sv)] = -grad_sv[sv];
            }
            rhs[row] = lin.energy;

            // Mass-balance rows: linearized change of each component amount
            for (k, &el) in spec.prescribed_element_indices().iter().enumerate() {
                let target = num_phase_rows + k;
                let (mu_coef, sv_coef, rhs_term) = mass_row_terms(&sens, el, entry.np);
                chempot.row_mut(target).add_assign(&mu_coef);
                statevar.row_mut(target).add_assign(&sv_coef);
                rhs[target] += rhs_term;
                if let Some(col) = entry.amount_column {
                    amount[(target, col)] = lin.masses[el];
                }
            }
            for el in 0..ncomp {
                let (mu_coef, sv_coef, rhs_term) = mass_row_terms(&sens, el, entry.np);
                chempot.row_mut(system_amount_row).add_assign(&mu_coef);
                statevar.row_mut(system_amount_row).add_assign(&sv_coef);
                rhs[system_amount_row] += rhs_term;
            }
            if let Some(col) = entry.amount_column {
                amount[(system_amount_row, col)] = 1.0;
            }

            sensitivities.push(sens);
        }

        Ok(Self {
            chempot,
            amount,
            statevar,
            rhs,
            sensitivities,
            num_phase_rows,
        })
    }

    pub fn nrows(&self) -> usize {
        self.rhs.len()
    }

    /// Square matrix over the free variables:
    /// `[free chemical potentials | free-stable amounts | free state variables]`.
    pub fn free_matrix(&self, spec: &SystemSpecification) -> DMatrix<f64> {
        let free_mu = spec.free_chemical_potential_indices();
        let free_sv = spec.free_statevar_indices();
        let ncols = free_mu.len() + self.amount.ncols() + free_sv.len();
        let mut m = DMatrix::zeros(self.nrows(), ncols);
        for (i, &c) in free_mu.iter().enumerate() {
            m.set_column(i, &self.chempot.column(c));
        }
        let offset = free_mu.len();
        m.view_mut((0, offset), (self.nrows(), self.amount.ncols()))
            .copy_from(&self.amount);
        let offset = offset + self.amount.ncols();
        for (i, &sv) in free_sv.iter().enumerate() {
            m.set_column(offset + i, &self.statevar.column(sv));
        }
        m
    }

    /// Right-hand side with the fixed chemical potentials moved over.
    pub fn rhs_with_fixed_potentials(
        &self,
        spec: &SystemSpecification,
        chemical_potentials: &DVector<f64>,
    ) -> DVector<f64> {
        let mut rhs = self.rhs.clone();
        for &c in spec.fixed_chemical_potential_indices() {
            rhs.axpy(-chemical_potentials[c], &self.chempot.column(c), 1.0);
        }
        rhs
    }
}

/// Contribution of one phase to the mass-balance row of element `el`:
/// coefficients on every chemical potential and state variable, and the right-hand
/// side term `−NP·M_y·c_G`.
fn mass_row_terms(
    sens: &PhaseSensitivity,
    el: usize,
    np: f64,
) -> (RowDVector<f64>, RowDVector<f64>, f64) {
    let m_y = sens.mass_jac_y.row(el);
    let mu_coef = (m_y * sens.c_component.transpose()) * np;
    let sv_coef = (m_y * &sens.c_statevars) * np;
    let rhs_term = -np * (m_y * &sens.c_g)[0];
    (mu_coef, sv_coef, rhs_term)
}

/// Least-squares solve through the SVD, discarding singular values below
/// `rcond × σ_max` (machine epsilon × dimension by default).
pub(crate) fn lstsq(
    matrix: DMatrix<f64>,
    rhs: &DVector<f64>,
    rcond: Option<f64>,
) -> SolverResult<DVector<f64>> {
    if matrix.is_empty() {
        return Ok(DVector::zeros(matrix.ncols()));
    }
    let rcond = rcond.unwrap_or(f64::EPSILON * matrix.nrows().max(matrix.ncols()) as f64);
    let svd = matrix.clone().svd(true, true);
    trace!(singular_values = ?svd.singular_values.as_slice(), "equilibrium matrix");
    let cutoff = rcond * svd.singular_values.max();
    let solve = |b: &DVector<f64>| {
        svd.solve(b, cutoff)
            .map_err(|what| SolverError::Numeric { what: what.to_string() })
    };
    let mut x = solve(rhs)?;
    // One refinement step; the raw SVD solve leaves mass-balance residuals
    // above the feasibility tolerance.
    let residual = rhs - &matrix * &x;
    x += solve(&residual)?;
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eq_models::{CefPhase, Sublattice, TemperatureFunction};
    use std::sync::Arc;

    fn ideal_binary() -> Arc<dyn PhaseRecord> {
        let mut phase = CefPhase::new(
            "LIQUID",
            vec!["A".into(), "B".into()],
            vec![Sublattice {
                site_ratio: 1.0,
                constituents: vec!["A".into(), "B".into()],
            }],
        )
        .unwrap();
        phase
            .add_endmember(&["A"], TemperatureFunction::constant(0.0))
            .unwrap();
        phase
            .add_endmember(&["B"], TemperatureFunction::constant(0.0))
            .unwrap();
        Arc::new(phase)
    }

    #[test]
    fn phase_matrix_is_bordered_hessian() {
        let record = ideal_binary();
        let lin = PhaseLinearization::evaluate(record.as_ref(), &[1e5, 1000.0, 0.25, 0.75])
            .unwrap();
        let m = lin.phase_matrix();
        assert_eq!(m.shape(), (3, 3));
        let rt = 8.314_462_618 * 1000.0;
        assert!((m[(0, 0)] - rt / 0.25).abs() < 1e-6);
        assert!((m[(1, 1)] - rt / 0.75).abs() < 1e-6);
        assert_eq!(m[(0, 2)], 1.0);
        assert_eq!(m[(2, 1)], 1.0);
        assert_eq!(m[(2, 2)], 0.0);
    }

    #[test]
    fn internal_step_reaches_potential_tangent() {
        // For an ideal solution μ_B − μ_A = RT ln(y_B / y_A); one Newton step from a
        // nearby composition moves toward the target.
        let record = ideal_binary();
        let rt = 8.314_462_618 * 1000.0;
        let target = 0.3_f64;
        let mu = DVector::from_vec(vec![rt * (1.0 - target).ln(), rt * target.ln()]);
        let mut y = 0.32;
        for _ in 0..8 {
            let lin =
                PhaseLinearization::evaluate(record.as_ref(), &[1e5, 1000.0, 1.0 - y, y]).unwrap();
            let step = lin.internal_step(&mu, &DVector::zeros(2)).unwrap();
            assert!((step[0] + step[1]).abs() < 1e-12);
            y += step[1];
        }
        assert!((y - target).abs() < 1e-10);
    }

    #[test]
    fn lstsq_handles_rank_deficiency() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_vec(vec![2.0, 2.0]);
        let x = lstsq(m, &b, None).unwrap();
        // Minimum-norm solution
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn lstsq_satisfies_badly_scaled_square_system() {
        // Row scales resemble a Step B system: phase row in J/mol, mass rows O(1e-4)
        let m = DMatrix::from_row_slice(
            3,
            3,
            &[
                1.0, 0.0, 8314.0, //
                3.2e-5, 1.1e-4, -2.0e-3, //
                1.0, 1.0, 0.0,
            ],
        );
        let b = DVector::from_vec(vec![-2500.0, 4.0e-9, 1.0e-12]);
        let x = lstsq(m.clone(), &b, None).unwrap();
        let residual = &b - &m * &x;
        assert!(residual[0].abs() < 1e-9, "{residual}");
        assert!(residual[1].abs() < 1e-15, "{residual}");
        assert!(residual[2].abs() < 1e-14, "{residual}");
    }

    #[test]
    fn empty_system_solves_to_empty_vector() {
        let x = lstsq(DMatrix::zeros(0, 0), &DVector::zeros(0), None).unwrap();
        assert!(x.is_empty());
    }
}

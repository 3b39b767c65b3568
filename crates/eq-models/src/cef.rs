//! Compound-energy-formalism phases.
//!
//! A phase is a set of sublattices with site ratios; each sublattice is occupied by
//! a subset of the system elements. Degrees of freedom are
//! `[P, T, y(sublattice 0)..., y(sublattice 1)..., ...]`.
//!
//! Molar Gibbs energy per mole of atoms:
//!
//! ```text
//! G = [ Σ_em Π_s y(s, em_s) · G_em(T)
//!     + Σ_L y_i · y_j · (y_i − y_j)^k · L_k(T)
//!     + R·T · Σ_s a_s Σ_i y_si · ln(y_si) ] / Σ_s a_s
//! ```
//!
//! Interaction parameters act within one sublattice and do not depend on the
//! occupation of the other sublattices. Vacancies are not supported, so the number of
//! atoms per formula unit is the constant `Σ_s a_s`.

use crate::error::{ModelError, ModelResult};
use crate::record::{PhaseRecord, StateVariable};
use crate::tfunc::TemperatureFunction;
use eq_core::constants::GAS_CONSTANT;
use nalgebra::{DMatrix, DVector};

const STATE_VARIABLES: [StateVariable; 2] = [StateVariable::Pressure, StateVariable::Temperature];
const T_IDX: usize = 1;
const NUM_STATEVARS: usize = 2;

/// One sublattice of a CEF phase.
#[derive(Clone, Debug, PartialEq)]
pub struct Sublattice {
    pub site_ratio: f64,
    pub constituents: Vec<String>,
}

/// `coef · Π y[idx]^pow` over distinct site-fraction indices.
#[derive(Clone, Debug)]
struct Monomial {
    coef: f64,
    factors: Vec<(usize, i32)>,
}

impl Monomial {
    /// Product of all factors except those at positions `skip`.
    fn partial_product(&self, y: &[f64], skip: &[usize]) -> f64 {
        self.factors
            .iter()
            .enumerate()
            .filter(|(pos, _)| !skip.contains(pos))
            .map(|(_, &(idx, pow))| y[idx].powi(pow))
            .product()
    }

    fn value(&self, y: &[f64]) -> f64 {
        self.coef * self.partial_product(y, &[])
    }

    fn add_gradient(&self, y: &[f64], scale: f64, out: &mut DVector<f64>) {
        for (pos, &(idx, pow)) in self.factors.iter().enumerate() {
            let rest = self.partial_product(y, &[pos]);
            out[idx] += scale * self.coef * pow as f64 * y[idx].powi(pow - 1) * rest;
        }
    }

    fn add_hessian(&self, y: &[f64], scale: f64, out: &mut DMatrix<f64>) {
        for (pj, &(j, pow_j)) in self.factors.iter().enumerate() {
            if pow_j >= 2 {
                let rest = self.partial_product(y, &[pj]);
                out[(j, j)] += scale
                    * self.coef
                    * (pow_j * (pow_j - 1)) as f64
                    * y[j].powi(pow_j - 2)
                    * rest;
            }
            for (pl, &(l, pow_l)) in self.factors.iter().enumerate() {
                if pl == pj {
                    continue;
                }
                let rest = self.partial_product(y, &[pj, pl]);
                out[(j, l)] += scale
                    * self.coef
                    * (pow_j * pow_l) as f64
                    * y[j].powi(pow_j - 1)
                    * y[l].powi(pow_l - 1)
                    * rest;
            }
        }
    }
}

#[derive(Clone, Debug)]
struct EnergyTerm {
    parameter: TemperatureFunction,
    monomial: Monomial,
}

/// Energy and the derivatives every property needs, already divided by the
/// number of sites.
struct EnergyDerivatives {
    g: f64,
    g_t: f64,
    g_tt: f64,
    g_ttt: f64,
    g_y: DVector<f64>,
    g_ty: DVector<f64>,
    g_tty: DVector<f64>,
    g_yy: DMatrix<f64>,
}

/// A phase described by the compound energy formalism.
#[derive(Clone, Debug)]
pub struct CefPhase {
    name: String,
    elements: Vec<String>,
    sublattices: Vec<Sublattice>,
    /// First site-fraction index of each sublattice.
    offsets: Vec<usize>,
    /// Element index of each site fraction.
    constituent_elements: Vec<usize>,
    /// Sublattice of each site fraction.
    constituent_sublattice: Vec<usize>,
    total_sites: f64,
    terms: Vec<EnergyTerm>,
}

impl CefPhase {
    /// Create a phase with no energy parameters.
    pub fn new(
        name: impl Into<String>,
        elements: Vec<String>,
        sublattices: Vec<Sublattice>,
    ) -> ModelResult<Self> {
        let name = name.into();
        let invalid = |what: String| ModelError::InvalidDefinition {
            phase: name.clone(),
            what,
        };

        if sublattices.is_empty() {
            return Err(invalid("at least one sublattice is required".into()));
        }
        let mut offsets = Vec::with_capacity(sublattices.len());
        let mut constituent_elements = Vec::new();
        let mut constituent_sublattice = Vec::new();
        let mut total_sites = 0.0;
        for (s, sublattice) in sublattices.iter().enumerate() {
            if !(sublattice.site_ratio.is_finite() && sublattice.site_ratio > 0.0) {
                return Err(invalid(format!(
                    "sublattice {s} has site ratio {}",
                    sublattice.site_ratio
                )));
            }
            if sublattice.constituents.is_empty() {
                return Err(invalid(format!("sublattice {s} has no constituents")));
            }
            offsets.push(constituent_elements.len());
            for (i, constituent) in sublattice.constituents.iter().enumerate() {
                if constituent.eq_ignore_ascii_case("VA") {
                    return Err(invalid("vacancies are not supported".into()));
                }
                if sublattice.constituents[..i].contains(constituent) {
                    return Err(invalid(format!(
                        "constituent {constituent} listed twice on sublattice {s}"
                    )));
                }
                let el_idx = elements
                    .iter()
                    .position(|el| el == constituent)
                    .ok_or_else(|| invalid(format!("unknown constituent {constituent}")))?;
                constituent_elements.push(el_idx);
                constituent_sublattice.push(s);
            }
            total_sites += sublattice.site_ratio;
        }

        Ok(Self {
            name,
            elements,
            sublattices,
            offsets,
            constituent_elements,
            constituent_sublattice,
            total_sites,
            terms: Vec::new(),
        })
    }

    pub fn sublattices(&self) -> &[Sublattice] {
        &self.sublattices
    }

    /// Site-fraction index (within the internal dof) of a constituent.
    pub fn site_fraction_index(&self, sublattice: usize, constituent: &str) -> Option<usize> {
        let sub = self.sublattices.get(sublattice)?;
        let pos = sub.constituents.iter().position(|c| c == constituent)?;
        Some(self.offsets[sublattice] + pos)
    }

    /// Uniform occupation of every sublattice.
    pub fn default_site_fractions(&self) -> Vec<f64> {
        self.constituent_sublattice
            .iter()
            .map(|&s| 1.0 / self.sublattices[s].constituents.len() as f64)
            .collect()
    }

    /// Add an end-member Gibbs energy, one constituent per sublattice.
    pub fn add_endmember(
        &mut self,
        constituents: &[&str],
        parameter: TemperatureFunction,
    ) -> ModelResult<()> {
        if constituents.len() != self.sublattices.len() {
            return Err(ModelError::InvalidDefinition {
                phase: self.name.clone(),
                what: format!(
                    "end-member {:?} needs one constituent per sublattice ({})",
                    constituents,
                    self.sublattices.len()
                ),
            });
        }
        let factors = constituents
            .iter()
            .enumerate()
            .map(|(s, c)| self.lookup(s, c).map(|idx| (idx, 1)))
            .collect::<ModelResult<Vec<_>>>()?;
        self.terms.push(EnergyTerm {
            parameter,
            monomial: Monomial { coef: 1.0, factors },
        });
        Ok(())
    }

    /// Add a Redlich-Kister interaction `y_i·y_j·(y_i − y_j)^order · L(T)` on one sublattice.
    pub fn add_interaction(
        &mut self,
        sublattice: usize,
        pair: (&str, &str),
        order: u32,
        parameter: TemperatureFunction,
    ) -> ModelResult<()> {
        let i = self.lookup(sublattice, pair.0)?;
        let j = self.lookup(sublattice, pair.1)?;
        if i == j {
            return Err(ModelError::InvalidDefinition {
                phase: self.name.clone(),
                what: format!("interaction between {} and itself", pair.0),
            });
        }
        // (y_i − y_j)^k = Σ_m C(k, m) · y_i^(k−m) · (−y_j)^m
        let k = order as i32;
        let mut binomial = 1.0;
        for m in 0..=k {
            let sign = if m % 2 == 0 { 1.0 } else { -1.0 };
            self.terms.push(EnergyTerm {
                parameter,
                monomial: Monomial {
                    coef: sign * binomial,
                    factors: vec![(i, k - m + 1), (j, m + 1)],
                },
            });
            binomial = binomial * (k - m) as f64 / (m + 1) as f64;
        }
        Ok(())
    }

    fn lookup(&self, sublattice: usize, constituent: &str) -> ModelResult<usize> {
        self.site_fraction_index(sublattice, constituent)
            .ok_or_else(|| ModelError::InvalidDefinition {
                phase: self.name.clone(),
                what: format!("{constituent} is not a constituent of sublattice {sublattice}"),
            })
    }

    fn split<'x>(&self, x: &'x [f64]) -> ModelResult<(f64, &'x [f64])> {
        self.check_dof(x)?;
        let t = x[T_IDX];
        if !(t.is_finite() && t > 0.0) {
            return Err(ModelError::NonPhysical {
                what: "temperature",
                value: t,
            });
        }
        let y = &x[NUM_STATEVARS..];
        if let Some(&bad) = y.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
            return Err(ModelError::NonPhysical {
                what: "site fraction",
                value: bad,
            });
        }
        Ok((t, y))
    }

    fn derivatives(&self, x: &[f64]) -> ModelResult<EnergyDerivatives> {
        let (t, y) = self.split(x)?;
        let n = y.len();
        let mut d = EnergyDerivatives {
            g: 0.0,
            g_t: 0.0,
            g_tt: 0.0,
            g_ttt: 0.0,
            g_y: DVector::zeros(n),
            g_ty: DVector::zeros(n),
            g_tty: DVector::zeros(n),
            g_yy: DMatrix::zeros(n, n),
        };

        for term in &self.terms {
            let [f0, f1, f2, f3] = term.parameter.derivatives(t);
            let m = term.monomial.value(y);
            d.g += f0 * m;
            d.g_t += f1 * m;
            d.g_tt += f2 * m;
            d.g_ttt += f3 * m;
            term.monomial.add_gradient(y, f0, &mut d.g_y);
            term.monomial.add_gradient(y, f1, &mut d.g_ty);
            term.monomial.add_gradient(y, f2, &mut d.g_tty);
            term.monomial.add_hessian(y, f0, &mut d.g_yy);
        }

        // Ideal mixing on each sublattice
        for (idx, &yi) in y.iter().enumerate() {
            let a = self.sublattices[self.constituent_sublattice[idx]].site_ratio;
            let ln_y = yi.ln();
            let s = a * yi * ln_y;
            d.g += GAS_CONSTANT * t * s;
            d.g_t += GAS_CONSTANT * s;
            d.g_y[idx] += GAS_CONSTANT * t * a * (ln_y + 1.0);
            d.g_ty[idx] += GAS_CONSTANT * a * (ln_y + 1.0);
            d.g_yy[(idx, idx)] += GAS_CONSTANT * t * a / yi;
        }

        let norm = 1.0 / self.total_sites;
        d.g *= norm;
        d.g_t *= norm;
        d.g_tt *= norm;
        d.g_ttt *= norm;
        d.g_y *= norm;
        d.g_ty *= norm;
        d.g_tty *= norm;
        d.g_yy *= norm;
        Ok(d)
    }

    /// Assemble a full-length gradient from its temperature and site-fraction parts.
    fn full_gradient(&self, d_t: f64, d_y: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.dof_len());
        out[T_IDX] = d_t;
        out.rows_mut(NUM_STATEVARS, d_y.len()).copy_from(d_y);
        out
    }
}

impl PhaseRecord for CefPhase {
    fn phase_name(&self) -> &str {
        &self.name
    }

    fn state_variables(&self) -> &[StateVariable] {
        &STATE_VARIABLES
    }

    fn nonvacant_elements(&self) -> &[String] {
        &self.elements
    }

    fn phase_dof(&self) -> usize {
        self.constituent_elements.len()
    }

    fn num_internal_cons(&self) -> usize {
        self.sublattices.len()
    }

    fn obj(&self, x: &[f64]) -> ModelResult<f64> {
        Ok(self.derivatives(x)?.g)
    }

    fn grad(&self, x: &[f64]) -> ModelResult<DVector<f64>> {
        let d = self.derivatives(x)?;
        Ok(self.full_gradient(d.g_t, &d.g_y))
    }

    fn hess(&self, x: &[f64]) -> ModelResult<DMatrix<f64>> {
        let d = self.derivatives(x)?;
        let n = self.dof_len();
        let ny = d.g_y.len();
        let mut out = DMatrix::zeros(n, n);
        out[(T_IDX, T_IDX)] = d.g_tt;
        for i in 0..ny {
            out[(T_IDX, NUM_STATEVARS + i)] = d.g_ty[i];
            out[(NUM_STATEVARS + i, T_IDX)] = d.g_ty[i];
        }
        out.view_mut((NUM_STATEVARS, NUM_STATEVARS), (ny, ny))
            .copy_from(&d.g_yy);
        Ok(out)
    }

    fn mass_obj(&self, x: &[f64], comp_idx: usize) -> ModelResult<f64> {
        let grad = self.mass_grad(x, comp_idx)?;
        Ok(grad.rows(NUM_STATEVARS, self.phase_dof()).dot(&DVector::from_column_slice(
            &x[NUM_STATEVARS..],
        )))
    }

    fn mass_grad(&self, x: &[f64], comp_idx: usize) -> ModelResult<DVector<f64>> {
        self.check_dof(x)?;
        if comp_idx >= self.elements.len() {
            return Err(ModelError::ComponentIndex {
                index: comp_idx,
                len: self.elements.len(),
            });
        }
        let mut out = DVector::zeros(self.dof_len());
        for (idx, &el) in self.constituent_elements.iter().enumerate() {
            if el == comp_idx {
                let a = self.sublattices[self.constituent_sublattice[idx]].site_ratio;
                out[NUM_STATEVARS + idx] = a / self.total_sites;
            }
        }
        Ok(out)
    }

    fn internal_cons_func(&self, x: &[f64]) -> ModelResult<DVector<f64>> {
        self.check_dof(x)?;
        let y = &x[NUM_STATEVARS..];
        let mut out = DVector::from_element(self.sublattices.len(), -1.0);
        for (idx, &s) in self.constituent_sublattice.iter().enumerate() {
            out[s] += y[idx];
        }
        Ok(out)
    }

    fn internal_cons_jac(&self, x: &[f64]) -> ModelResult<DMatrix<f64>> {
        self.check_dof(x)?;
        let mut out = DMatrix::zeros(self.sublattices.len(), self.dof_len());
        for (idx, &s) in self.constituent_sublattice.iter().enumerate() {
            out[(s, NUM_STATEVARS + idx)] = 1.0;
        }
        Ok(out)
    }

    fn prop(&self, name: &str, x: &[f64]) -> ModelResult<f64> {
        let d = self.derivatives(x)?;
        let t = x[T_IDX];
        match name {
            "GM" => Ok(d.g),
            "SM" => Ok(-d.g_t),
            "HM" => Ok(d.g - t * d.g_t),
            "CPM" => Ok(-t * d.g_tt),
            _ => Err(self.unknown_property(name)),
        }
    }

    fn prop_grad(&self, name: &str, x: &[f64]) -> ModelResult<DVector<f64>> {
        let d = self.derivatives(x)?;
        let t = x[T_IDX];
        match name {
            "GM" => Ok(self.full_gradient(d.g_t, &d.g_y)),
            "SM" => Ok(self.full_gradient(-d.g_tt, &(-&d.g_ty))),
            "HM" => Ok(self.full_gradient(-t * d.g_tt, &(&d.g_y - t * &d.g_ty))),
            "CPM" => Ok(self.full_gradient(-d.g_tt - t * d.g_ttt, &(-t * &d.g_tty))),
            _ => Err(self.unknown_property(name)),
        }
    }
}

impl CefPhase {
    fn unknown_property(&self, name: &str) -> ModelError {
        ModelError::UnknownProperty {
            phase: self.name.clone(),
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(l0: f64) -> CefPhase {
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
            .add_endmember(&["B"], TemperatureFunction::constant(1000.0))
            .unwrap();
        phase
            .add_interaction(0, ("A", "B"), 0, TemperatureFunction::constant(l0))
            .unwrap();
        phase
    }

    #[test]
    fn regular_solution_energy() {
        let phase = binary(10_000.0);
        let x = [101_325.0, 1000.0, 0.25, 0.75];
        let rt = GAS_CONSTANT * 1000.0;
        let expected = 0.75 * 1000.0
            + rt * (0.25 * 0.25_f64.ln() + 0.75 * 0.75_f64.ln())
            + 10_000.0 * 0.25 * 0.75;
        assert!((phase.obj(&x).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn masses_and_constraints() {
        let phase = binary(0.0);
        let x = [101_325.0, 1000.0, 0.3, 0.7];
        assert!((phase.mass_obj(&x, 0).unwrap() - 0.3).abs() < 1e-15);
        assert!((phase.mass_obj(&x, 1).unwrap() - 0.7).abs() < 1e-15);
        assert!(phase.internal_cons_func(&x).unwrap()[0].abs() < 1e-15);
        let jac = phase.internal_cons_jac(&x).unwrap();
        assert_eq!(jac.ncols(), 4);
        assert_eq!(jac[(0, 2)], 1.0);
        assert_eq!(jac[(0, 1)], 0.0);
    }

    #[test]
    fn two_sublattice_masses_are_normalized() {
        let phase = CefPhase::new(
            "SIGMA",
            vec!["A".into(), "B".into()],
            vec![
                Sublattice {
                    site_ratio: 3.0,
                    constituents: vec!["A".into(), "B".into()],
                },
                Sublattice {
                    site_ratio: 1.0,
                    constituents: vec!["B".into()],
                },
            ],
        )
        .unwrap();
        let x = [101_325.0, 800.0, 0.5, 0.5, 1.0];
        let total: f64 = (0..2).map(|c| phase.mass_obj(&x, c).unwrap()).sum();
        assert!((total - 1.0).abs() < 1e-15);
        assert!((phase.mass_obj(&x, 0).unwrap() - 1.5 / 4.0).abs() < 1e-15);
        assert_eq!(phase.num_internal_cons(), 2);
        assert_eq!(phase.default_site_fractions(), vec![0.5, 0.5, 1.0]);
    }

    #[test]
    fn rejects_bad_definitions() {
        let els = vec!["A".to_string()];
        let va = CefPhase::new(
            "X",
            els.clone(),
            vec![Sublattice {
                site_ratio: 1.0,
                constituents: vec!["VA".into()],
            }],
        );
        assert!(matches!(va, Err(ModelError::InvalidDefinition { .. })));

        let unknown = CefPhase::new(
            "X",
            els.clone(),
            vec![Sublattice {
                site_ratio: 1.0,
                constituents: vec!["C".into()],
            }],
        );
        assert!(unknown.is_err());

        let mut ok = CefPhase::new(
            "X",
            els,
            vec![Sublattice {
                site_ratio: 1.0,
                constituents: vec!["A".into()],
            }],
        )
        .unwrap();
        assert!(ok.add_endmember(&["A", "A"], TemperatureFunction::default()).is_err());
    }

    #[test]
    fn rejects_non_physical_inputs() {
        let phase = binary(0.0);
        assert!(phase.obj(&[101_325.0, -1.0, 0.5, 0.5]).is_err());
        assert!(phase.obj(&[101_325.0, 300.0, 0.0, 1.0]).is_err());
        assert!(matches!(
            phase.obj(&[300.0, 0.5, 0.5]),
            Err(ModelError::DofLength { .. })
        ));
        assert!(phase.prop("VM", &[101_325.0, 300.0, 0.5, 0.5]).is_err());
    }

    #[test]
    fn heat_capacity_of_pure_phase() {
        let mut phase = CefPhase::new(
            "FCC",
            vec!["A".into()],
            vec![Sublattice {
                site_ratio: 1.0,
                constituents: vec!["A".into()],
            }],
        )
        .unwrap();
        phase
            .add_endmember(
                &["A"],
                TemperatureFunction {
                    a: -8000.0,
                    b: 130.0,
                    c: -24.0,
                    d: 0.0,
                },
            )
            .unwrap();
        let x = [101_325.0, 600.0, 1.0];
        assert!((phase.prop("CPM", &x).unwrap() - 24.0).abs() < 1e-10);
        let hm = phase.prop("HM", &x).unwrap();
        // H = a - c·T for this functional form
        assert!((hm - (-8000.0 + 24.0 * 600.0)).abs() < 1e-8);
    }
}

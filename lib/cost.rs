//! Piecewise-in-time cost and its analytic gradient.
//!
//! Forward and backward trajectories are blended into one target state per
//! timestep. The cost at step `t` is the squared overlap of the blended target
//! at `t + 1` with the one-step propagation of the blended target at `t`.

use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use crate::{
    propagate::{ Propagator, StateStepper },
    store::{ Direction, HamiltonianStore },
};

/// Complex inner product `⟨a|b⟩`, conjugating `a`, summed in index order.
pub fn overlap(a: nd::ArrayView1<C64>, b: nd::ArrayView1<C64>) -> C64 {
    a.iter().zip(b.iter())
        .fold(C64::zero(), |acc, (ak, bk)| acc + ak.conj() * bk)
}

/// Blend forward and backward trajectories into per-timestep targets.
///
/// All three arrays are `(plen + 1, dim)`, and
/// ```text
/// out[t] = (t / plen) forward[t] + ((plen - t) / plen) backward[plen - t]
/// ```
///
/// *Panics* if `out` has fewer than two rows or the shapes differ.
pub fn build_intermediate(
    forward: nd::ArrayView2<C64>,
    backward: nd::ArrayView2<C64>,
    mut out: nd::ArrayViewMut2<C64>,
) {
    assert!(out.nrows() >= 2, "build_intermediate: need at least one timestep");
    assert_eq!(forward.dim(), out.dim(), "build_intermediate: forward shape");
    assert_eq!(backward.dim(), out.dim(), "build_intermediate: backward shape");
    let plen = out.nrows() - 1;
    let len = plen as f64;
    for (t, row) in out.outer_iter_mut().enumerate() {
        let a = t as f64 / len;
        let b = (plen - t) as f64 / len;
        nd::Zip::from(row)
            .and(forward.row(t))
            .and(backward.row(plen - t))
            .for_each(|o, f, g| { *o = f * a + g * b; });
    }
}

/// Cost of one timestep, writing its gradient with respect to each control
/// amplitude into `grads`.
///
/// `psi_in` is propagated one step by `prop` and compared against `target`:
/// ```text
/// cost   = |⟨target|ψ'⟩|^2
/// grad_c = 2 Re(⟨target|ψ'⟩^* ⟨target|∂_c ψ'⟩)
/// ```
pub fn cost_grad(
    prop: &Propagator,
    psi_in: nd::ArrayView1<C64>,
    target: nd::ArrayView1<C64>,
    mut grads: nd::ArrayViewMut1<f64>,
) -> f64
{
    let dim = psi_in.len();
    let mut psi_out: nd::Array1<C64> = nd::Array1::zeros(dim);
    let mut d_psi_out: nd::Array2<C64> = nd::Array2::zeros((grads.len(), dim));
    prop.propagate_with_sensitivity(psi_in, psi_out.view_mut(), d_psi_out.view_mut());
    let ovlp = overlap(target, psi_out.view());
    grads.iter_mut().zip(d_psi_out.outer_iter())
        .for_each(|(g, d_psi)| {
            let d_ovlp = overlap(target, d_psi);
            *g = 2.0 * (ovlp.re * d_ovlp.re + ovlp.im * d_ovlp.im);
        });
    ovlp.norm_sqr()
}

/// Fill the `(nstate, plen)` cost and `(nstate, plen, nctrls)` gradient
/// arrays from `(nstate, plen + 1, dim)` blended targets.
///
/// Every `(trajectory, timestep)` term is independent and computed in
/// parallel; each uses the forward generators with its own pulse row.
///
/// *Panics* if the shapes are inconsistent with `pulse` and `store`.
pub fn assemble(
    store: &HamiltonianStore,
    order: usize,
    dt: f64,
    pulse: nd::ArrayView2<f64>,
    targets: nd::ArrayView3<C64>,
    costs: nd::ArrayViewMut2<f64>,
    mut grads: nd::ArrayViewMut3<f64>,
) {
    let (plen, nctrls) = pulse.dim();
    let nstate = costs.nrows();
    assert_eq!(nctrls, store.nctrls(), "assemble: pulse control channels");
    assert_eq!(costs.dim(), (nstate, plen), "assemble: cost shape");
    assert_eq!(grads.dim(), (nstate, plen, nctrls), "assemble: gradient shape");
    assert_eq!(
        targets.dim(), (nstate, plen + 1, store.dim()),
        "assemble: target shape",
    );
    nd::Zip::indexed(costs)
        .and(grads.lanes_mut(nd::Axis(2)))
        .par_for_each(|(j, t), cost, g| {
            let stepper = StateStepper::new(store, Direction::Forward, pulse.row(t));
            let prop = Propagator::new(stepper, order, dt);
            *cost = cost_grad(
                &prop,
                targets.slice(s![j, t, ..]),
                targets.slice(s![j, t + 1, ..]),
                g,
            );
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{ rngs::StdRng, Rng, SeedableRng };
    use crate::{ config::EngineConfig, store::Term };

    fn c(re: f64, im: f64) -> C64 { C64::new(re, im) }

    fn random_state(rng: &mut StdRng, dim: usize) -> nd::Array1<C64> {
        let psi: nd::Array1<C64>
            = (0..dim)
            .map(|_| c(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5))
            .collect();
        let norm = psi.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt();
        psi.mapv(|x| x / norm)
    }

    /// Three-level ladder with two drives, one on each transition.
    fn ladder_store() -> HamiltonianStore {
        let config = EngineConfig {
            dim: 3,
            nctrls: 2,
            plen: 1,
            nstate: 1,
            maxnnz: 4,
            taylor_order: 10,
            dt: 0.3,
        };
        let o = c(0.0, 0.0);
        let l = c(1.0, 0.0);
        let mut store = HamiltonianStore::new(&config);
        store.set_hamiltonian(
            Direction::Forward, Term::Drift,
            &nd::array![[o, o, o], [o, l, o], [o, o, c(2.5, 0.0)]], 0.0,
        ).unwrap();
        store.set_hamiltonian(
            Direction::Forward, Term::Control(0),
            &nd::array![[o, l, o], [l, o, o], [o, o, o]], 0.0,
        ).unwrap();
        store.set_hamiltonian(
            Direction::Forward, Term::Control(1),
            &nd::array![[o, o, o], [o, o, l], [o, l, o]], 0.0,
        ).unwrap();
        store
    }

    #[test]
    fn overlap_conjugates_left() {
        let a = nd::array![c(0.0, 1.0), c(1.0, 0.0)];
        let b = nd::array![c(0.0, 1.0), c(0.0, 0.0)];
        assert_eq!(overlap(a.view(), b.view()), c(1.0, 0.0));
        assert_eq!(overlap(b.view(), a.view()), c(1.0, 0.0));
        let d = nd::array![c(1.0, 0.0), c(0.0, 0.0)];
        assert_eq!(overlap(d.view(), a.view()), c(0.0, 1.0));
        assert_eq!(overlap(a.view(), d.view()), c(0.0, -1.0));
    }

    #[test]
    fn intermediate_endpoints() {
        let fwd = nd::array![
            [c(1.0, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(0.0, 2.0)],
        ];
        let bwd = nd::array![
            [c(4.0, 0.0), c(0.0, 0.0)],
            [c(0.0, 0.0), c(8.0, 0.0)],
            [c(0.0, -6.0), c(0.0, 0.0)],
        ];
        let mut out: nd::Array2<C64> = nd::Array2::zeros((3, 2));
        build_intermediate(fwd.view(), bwd.view(), out.view_mut());
        // t = 0: all backward[2]; t = 2: all forward[2]; t = 1: half each
        assert_eq!(out.row(0), bwd.row(2));
        assert_eq!(out.row(1), nd::array![c(0.0, 0.0), c(4.0, 0.0)].view());
        assert_eq!(out.row(2), fwd.row(2));
    }

    #[test]
    #[should_panic(expected = "build_intermediate: need at least one timestep")]
    fn intermediate_rejects_empty() {
        let empty: nd::Array2<C64> = nd::Array2::zeros((0, 2));
        let mut out: nd::Array2<C64> = nd::Array2::zeros((0, 2));
        build_intermediate(empty.view(), empty.view(), out.view_mut());
    }

    #[test]
    #[should_panic(expected = "build_intermediate: backward shape")]
    fn intermediate_rejects_short_backward() {
        let fwd: nd::Array2<C64> = nd::Array2::zeros((3, 2));
        let bwd: nd::Array2<C64> = nd::Array2::zeros((2, 2));
        let mut out: nd::Array2<C64> = nd::Array2::zeros((3, 2));
        build_intermediate(fwd.view(), bwd.view(), out.view_mut());
    }

    #[test]
    #[should_panic(expected = "assemble: target shape")]
    fn assemble_rejects_short_targets() {
        let store = ladder_store();
        let pulse = nd::array![[0.1, 0.2], [-0.3, 0.05]];
        let targets: nd::Array3<C64> = nd::Array3::zeros((1, 2, 3));
        let mut costs: nd::Array2<f64> = nd::Array2::zeros((1, 2));
        let mut grads: nd::Array3<f64> = nd::Array3::zeros((1, 2, 2));
        assemble(
            &store, 10, 0.3, pulse.view(), targets.view(),
            costs.view_mut(), grads.view_mut(),
        );
    }

    #[test]
    fn cost_bounded_for_normalized_states() {
        let store = ladder_store();
        let mut rng = StdRng::seed_from_u64(10546);
        for _ in 0..50 {
            let psi = random_state(&mut rng, 3);
            let target = random_state(&mut rng, 3);
            let amps = nd::array![rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5];
            let prop = Propagator::new(
                StateStepper::new(&store, Direction::Forward, amps.view()), 10, 0.3);
            let mut grads: nd::Array1<f64> = nd::Array1::zeros(2);
            let cost = cost_grad(&prop, psi.view(), target.view(), grads.view_mut());
            assert!((0.0..=1.0 + 1e-12).contains(&cost), "cost = {}", cost);
        }
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let store = ladder_store();
        let mut rng = StdRng::seed_from_u64(271828);
        let psi = random_state(&mut rng, 3);
        let target = random_state(&mut rng, 3);
        let amps = nd::array![0.4, -0.9];
        let cost_at = |a: &nd::Array1<f64>, grads: &mut nd::Array1<f64>| {
            let prop = Propagator::new(
                StateStepper::new(&store, Direction::Forward, a.view()), 10, 0.3);
            cost_grad(&prop, psi.view(), target.view(), grads.view_mut())
        };
        let mut grads: nd::Array1<f64> = nd::Array1::zeros(2);
        cost_at(&amps, &mut grads);
        let eps = 1e-5;
        let mut scratch: nd::Array1<f64> = nd::Array1::zeros(2);
        for ch in 0..2 {
            let mut plus = amps.clone();
            plus[ch] += eps;
            let mut minus = amps.clone();
            minus[ch] -= eps;
            let fd
                = (cost_at(&plus, &mut scratch) - cost_at(&minus, &mut scratch))
                / (2.0 * eps);
            assert_abs_diff_eq!(grads[ch], fd, epsilon = 1e-8);
        }
    }

    #[test]
    fn assemble_matches_cost_grad() {
        let store = ladder_store();
        let mut rng = StdRng::seed_from_u64(31415);
        let pulse = nd::array![[0.1, 0.2], [-0.3, 0.05]];
        let mut targets: nd::Array3<C64> = nd::Array3::zeros((2, 3, 3));
        for j in 0..2 {
            for t in 0..3 {
                targets.slice_mut(s![j, t, ..]).assign(&random_state(&mut rng, 3));
            }
        }
        let mut costs: nd::Array2<f64> = nd::Array2::zeros((2, 2));
        let mut grads: nd::Array3<f64> = nd::Array3::zeros((2, 2, 2));
        assemble(
            &store, 10, 0.3, pulse.view(), targets.view(),
            costs.view_mut(), grads.view_mut(),
        );
        for j in 0..2 {
            for t in 0..2 {
                let prop = Propagator::new(
                    StateStepper::new(&store, Direction::Forward, pulse.row(t)), 10, 0.3);
                let mut g: nd::Array1<f64> = nd::Array1::zeros(2);
                let cost = cost_grad(
                    &prop,
                    targets.slice(s![j, t, ..]),
                    targets.slice(s![j, t + 1, ..]),
                    g.view_mut(),
                );
                assert_eq!(costs[[j, t]], cost);
                assert_eq!(grads.slice(s![j, t, ..]), g.view());
            }
        }
    }
}

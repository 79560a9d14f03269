//! Truncated-Taylor propagation over a single timestep and its derivative with
//! respect to each control amplitude.
//!
//! For generator `H = G_0 + Σ_c a_c G_c` and timestep `dt`, one step computes
//! ```text
//! ψ' = Σ_{k=0}^{K} (dt H)^k / k! ψ
//! ```
//! through the recursion `term_0 = ψ`, `term_k = (dt / k) H term_{k-1}`. The
//! derivative with respect to `a_c` follows the same recursion by the product
//! rule,
//! ```text
//! dterm_0 = 0
//! dterm_k = (dt / k) (G_c term_{k-1} + H dterm_{k-1})
//! ```
//! so every undifferentiated term is kept in a [`TaylorBuffer`].

use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use rayon::iter::{ IndexedParallelIterator, IntoParallelIterator, ParallelIterator };
use crate::store::{ Direction, HamiltonianStore };

/* Stepper ********************************************************************/

/// Action of the total generator at one timestep.
#[derive(Copy, Clone, Debug)]
pub struct StateStepper<'a> {
    store: &'a HamiltonianStore,
    dir: Direction,
    amps: nd::ArrayView1<'a, f64>,
}

impl<'a> StateStepper<'a> {
    /// *Panics* if `amps` doesn't have one entry per control channel.
    pub fn new(
        store: &'a HamiltonianStore,
        dir: Direction,
        amps: nd::ArrayView1<'a, f64>,
    ) -> Self
    {
        assert_eq!(amps.len(), store.nctrls(), "StateStepper: amplitude count");
        Self { store, dir, amps }
    }

    pub fn store(&self) -> &'a HamiltonianStore { self.store }

    pub fn dir(&self) -> Direction { self.dir }

    /// Add `(scale H) psi_in` into both `psi_out` and `psi_acc`.
    ///
    /// Channels are applied one after another in ascending order, so the
    /// summation order into each destination index is fixed.
    pub fn accumulate(
        &self,
        psi_in: nd::ArrayView1<C64>,
        mut psi_out: nd::ArrayViewMut1<C64>,
        mut psi_acc: nd::ArrayViewMut1<C64>,
        scale: f64,
    ) {
        if let Some(drift) = self.store.drift(self.dir) {
            drift.apply_dual(
                psi_in.view(), psi_out.view_mut(), psi_acc.view_mut(), scale);
        }
        for (c, &a) in self.amps.iter().enumerate() {
            self.store.control(self.dir, c).apply_dual(
                psi_in.view(), psi_out.view_mut(), psi_acc.view_mut(), a * scale);
        }
    }

    /// Overwrite `psi_out` with `(scale H) psi_in` and add the same into
    /// `psi_acc`.
    pub fn step(
        &self,
        psi_in: nd::ArrayView1<C64>,
        mut psi_out: nd::ArrayViewMut1<C64>,
        psi_acc: nd::ArrayViewMut1<C64>,
        scale: f64,
    ) {
        psi_out.fill(C64::zero());
        self.accumulate(psi_in, psi_out, psi_acc, scale);
    }
}

/* Taylor buffer **************************************************************/

/// Every term of the series at one timestep, `term_0` through `term_K`.
#[derive(Clone, Debug, PartialEq)]
pub struct TaylorBuffer {
    terms: nd::Array2<C64>,
}

impl TaylorBuffer {
    /// Truncation order `K`; the buffer holds `K + 1` terms.
    pub fn order(&self) -> usize { self.terms.nrows() - 1 }

    pub fn term(&self, k: usize) -> nd::ArrayView1<'_, C64> { self.terms.row(k) }
}

/// Borrow slot `idx` for reading and the other slot for writing.
fn ping_pong<T>(bufs: &mut [T; 2], idx: usize) -> (&T, &mut T) {
    let [a, b] = bufs;
    if idx == 0 { (a, b) } else { (b, a) }
}

/* Propagator *****************************************************************/

/// Fixed-order Taylor approximation to `exp(dt H)` at one timestep.
#[derive(Copy, Clone, Debug)]
pub struct Propagator<'a> {
    stepper: StateStepper<'a>,
    order: usize,
    dt: f64,
}

impl<'a> Propagator<'a> {
    pub fn new(stepper: StateStepper<'a>, order: usize, dt: f64) -> Self {
        Self { stepper, order, dt }
    }

    /// Write the propagated state into `psi_out` and return every series term.
    ///
    /// Terms are added into `psi_out` in ascending order. The zeroth term is
    /// `psi_in` itself; coefficients start at `dt / 1`.
    pub fn propagate(
        &self,
        psi_in: nd::ArrayView1<C64>,
        mut psi_out: nd::ArrayViewMut1<C64>,
    ) -> TaylorBuffer
    {
        let mut terms: nd::Array2<C64>
            = nd::Array2::zeros((self.order + 1, psi_in.len()));
        terms.row_mut(0).assign(&psi_in);
        psi_out.assign(&psi_in);
        for k in 1..=self.order {
            let (prev, next)
                = terms.multi_slice_mut((s![k - 1, ..], s![k, ..]));
            self.stepper.step(
                prev.view(), next, psi_out.view_mut(), self.dt / k as f64);
        }
        TaylorBuffer { terms }
    }

    /// Write the derivative of the propagated state with respect to each
    /// control amplitude into the rows of `d_psi_out`, given the terms of the
    /// corresponding [`Self::propagate`] call.
    ///
    /// Channels are computed in parallel; each reads `taylor` and writes only
    /// its own row.
    ///
    /// *Panics* if `d_psi_out` is not `(nctrls, dim)` or `taylor` was produced
    /// with a different order.
    pub fn sensitivity(
        &self,
        taylor: &TaylorBuffer,
        mut d_psi_out: nd::ArrayViewMut2<C64>,
    ) {
        assert_eq!(taylor.order(), self.order, "sensitivity: Taylor order");
        assert_eq!(
            d_psi_out.nrows(), self.stepper.store().nctrls(),
            "sensitivity: control channel count",
        );
        d_psi_out.axis_iter_mut(nd::Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(c, d_out)| self.channel_sensitivity(c, taylor, d_out));
    }

    fn channel_sensitivity(
        &self,
        c: usize,
        taylor: &TaylorBuffer,
        mut d_out: nd::ArrayViewMut1<C64>,
    ) {
        let dim = d_out.len();
        let op = self.stepper.store().control(self.stepper.dir(), c);
        let mut d_ks: [nd::Array1<C64>; 2]
            = [nd::Array1::zeros(dim), nd::Array1::zeros(dim)];
        let mut idx: usize = 0;
        d_out.fill(C64::zero());
        for k in 1..=self.order {
            let pf = self.dt / k as f64;
            let (d_prev, d_next) = ping_pong(&mut d_ks, idx);
            d_next.fill(C64::zero());
            op.apply_dual(
                taylor.term(k - 1), d_next.view_mut(), d_out.view_mut(), pf);
            self.stepper.accumulate(
                d_prev.view(), d_next.view_mut(), d_out.view_mut(), pf);
            idx = 1 - idx;
        }
    }

    /// [`Self::propagate`] followed by [`Self::sensitivity`].
    pub fn propagate_with_sensitivity(
        &self,
        psi_in: nd::ArrayView1<C64>,
        psi_out: nd::ArrayViewMut1<C64>,
        d_psi_out: nd::ArrayViewMut2<C64>,
    ) -> TaylorBuffer
    {
        let taylor = self.propagate(psi_in, psi_out);
        self.sensitivity(&taylor, d_psi_out);
        taylor
    }
}

//! Sequential propagation of states across the full pulse timeline.

use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use rayon::iter::{ IndexedParallelIterator, IntoParallelIterator, ParallelIterator };
use crate::{
    propagate::{ Propagator, StateStepper },
    store::{ Direction, HamiltonianStore },
};

/// Order in which pulse rows are applied along a trajectory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Schedule {
    /// Step `i` uses pulse row `i`.
    InOrder,
    /// Step `i` uses pulse row `plen - 1 - i`.
    Reversed,
}

/// Drives [`Propagator`] over every timestep of every trajectory.
///
/// Within one trajectory, the output at step `i` is the input at step `i + 1`;
/// trajectories are independent and run in parallel.
#[derive(Copy, Clone, Debug)]
pub struct TrajectoryDriver<'a> {
    store: &'a HamiltonianStore,
    order: usize,
    dt: f64,
}

impl<'a> TrajectoryDriver<'a> {
    pub fn new(store: &'a HamiltonianStore, order: usize, dt: f64) -> Self {
        Self { store, order, dt }
    }

    fn propagator<'p>(
        &'p self,
        dir: Direction,
        pulse: &'p nd::ArrayView2<'_, f64>,
        schedule: Schedule,
        i: usize,
    ) -> Propagator<'p>
    {
        let row = match schedule {
            Schedule::InOrder => i,
            Schedule::Reversed => pulse.nrows() - 1 - i,
        };
        Propagator::new(
            StateStepper::new(self.store, dir, pulse.row(row)), self.order, self.dt)
    }

    /// Propagate one trajectory in place.
    ///
    /// `states` is `(plen + 1, dim)` with the initial condition in row 0;
    /// rows `1..=plen` are overwritten.
    ///
    /// *Panics* if `states` doesn't have one more row than `pulse`.
    pub fn drive(
        &self,
        dir: Direction,
        pulse: nd::ArrayView2<f64>,
        schedule: Schedule,
        mut states: nd::ArrayViewMut2<C64>,
    ) {
        let plen = pulse.nrows();
        assert_eq!(states.nrows(), plen + 1, "drive: state count");
        for i in 0..plen {
            let (prev, next)
                = states.multi_slice_mut((s![i, ..], s![i + 1, ..]));
            self.propagator(dir, &pulse, schedule, i)
                .propagate(prev.view(), next);
        }
    }

    /// Propagate one trajectory in place, also writing the sensitivity of
    /// each step's output to that step's amplitudes.
    ///
    /// `d_states` is `(plen, nctrls, dim)`: entry `[i, c, ..]` is the
    /// derivative of `states[i + 1, ..]` with respect to `pulse[i, c]` for the
    /// row actually applied at step `i`.
    pub fn drive_with_sensitivity(
        &self,
        dir: Direction,
        pulse: nd::ArrayView2<f64>,
        schedule: Schedule,
        mut states: nd::ArrayViewMut2<C64>,
        mut d_states: nd::ArrayViewMut3<C64>,
    ) {
        let plen = pulse.nrows();
        assert_eq!(states.nrows(), plen + 1, "drive_with_sensitivity: state count");
        assert_eq!(d_states.len_of(nd::Axis(0)), plen,
            "drive_with_sensitivity: sensitivity count");
        for i in 0..plen {
            let (prev, next)
                = states.multi_slice_mut((s![i, ..], s![i + 1, ..]));
            self.propagator(dir, &pulse, schedule, i)
                .propagate_with_sensitivity(
                    prev.view(), next, d_states.slice_mut(s![i, .., ..]));
        }
    }

    /// [`Self::drive`] for a batch of trajectories, `states` being
    /// `(nstate, plen + 1, dim)`.
    pub fn drive_batch(
        &self,
        dir: Direction,
        pulse: nd::ArrayView2<f64>,
        schedule: Schedule,
        mut states: nd::ArrayViewMut3<C64>,
    ) {
        states.axis_iter_mut(nd::Axis(0))
            .into_par_iter()
            .for_each(|traj| self.drive(dir, pulse, schedule, traj));
    }

    /// [`Self::drive_with_sensitivity`] for a batch of trajectories, with
    /// `d_states` being `(nstate, plen, nctrls, dim)`.
    pub fn drive_batch_with_sensitivity(
        &self,
        dir: Direction,
        pulse: nd::ArrayView2<f64>,
        schedule: Schedule,
        mut states: nd::ArrayViewMut3<C64>,
        mut d_states: nd::ArrayViewMut4<C64>,
    ) {
        states.axis_iter_mut(nd::Axis(0))
            .into_par_iter()
            .zip(d_states.axis_iter_mut(nd::Axis(0)).into_par_iter())
            .for_each(|(traj, d_traj)| {
                self.drive_with_sensitivity(dir, pulse, schedule, traj, d_traj)
            });
    }
}

//! Owned engine context: shape constants, generators, and every trajectory
//! buffer, with the step operation tying propagation and cost assembly
//! together.

use itertools::Itertools;
use ndarray::{ self as nd, s };
use num_complex::Complex64 as C64;
use tracing::{ debug, trace, warn };
use crate::{
    config::{ EngineConfig, Shape },
    cost::{ assemble, build_intermediate },
    error::{ GrapeError, GrapeResult },
    sparse::CsrOperator,
    store::{ Direction, HamiltonianStore, Term },
    trajectory::{ Schedule, TrajectoryDriver },
};

/// Relative change in a trajectory's norm over the full pulse above which a
/// warning is logged.
pub const NORM_DRIFT_TOL: f64 = 1e-3;

/// One of the three state buffers held by an [`Engine`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Initial states propagated forward under the pulse.
    Forward,
    /// Target states propagated backward under the reversed pulse.
    Backward,
    /// Time-weighted blend of the forward and backward trajectories.
    Intermediate,
}

impl Role {
    fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::Backward => 1,
            Self::Intermediate => 2,
        }
    }
}

/// Costs and gradients from one [`Engine::step`].
#[derive(Clone, Debug, PartialEq)]
pub struct StepOutput {
    /// Per-trajectory, per-timestep costs, `(nstate, plen)`.
    pub costs: nd::Array2<f64>,
    /// Per-trajectory gradients, `(nstate, plen, nctrls)`.
    pub grads: nd::Array3<f64>,
}

impl StepOutput {
    /// Sum costs over timesteps, giving one value per trajectory.
    pub fn trajectory_costs(&self) -> nd::Array1<f64> {
        self.costs.sum_axis(nd::Axis(1))
    }

    /// Sum costs over trajectories, giving one value per timestep.
    pub fn summed_costs(&self) -> nd::Array1<f64> {
        self.costs.sum_axis(nd::Axis(0))
    }

    /// Sum gradients over trajectories, giving a `(plen, nctrls)` array
    /// shaped like the pulse.
    pub fn summed_grads(&self) -> nd::Array2<f64> {
        self.grads.sum_axis(nd::Axis(0))
    }
}

/// GRAPE propagation and gradient engine.
///
/// All buffers are sized once from the [`EngineConfig`] on construction. The
/// usual sequence is
/// 1. [`Self::new`] with a filled [`HamiltonianStore`] (or fill it afterward
///    with [`Self::load_operator`]);
/// 2. [`Self::load_initial_states`];
/// 3. [`Self::step`] once per optimizer iteration.
#[derive(Clone, Debug)]
pub struct Engine {
    config: EngineConfig,
    store: HamiltonianStore,
    initial: nd::Array2<C64>,
    targets: nd::Array2<C64>,
    states: [nd::Array3<C64>; 3],
    loaded: bool,
}

impl Engine {
    /// Create a new engine, checking that `store` was built for `config`.
    pub fn new(config: EngineConfig, store: HamiltonianStore) -> GrapeResult<Self> {
        config.validate()?;
        store.check_config(&config)?;
        let EngineConfig { dim, plen, nstate, .. } = config;
        let traj: nd::Array3<C64> = nd::Array3::zeros((nstate, plen + 1, dim));
        debug!(dim, nctrls = config.nctrls, plen, nstate, "engine created");
        Ok(Self {
            initial: nd::Array2::zeros((nstate, dim)),
            targets: nd::Array2::zeros((nstate, dim)),
            states: [traj.clone(), traj.clone(), traj],
            loaded: false,
            config,
            store,
        })
    }

    /// Return the active shape constants.
    pub fn configure(&self) -> Shape { self.config.shape() }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn store(&self) -> &HamiltonianStore { &self.store }

    /// Replace a single generator in the store.
    pub fn load_operator(&mut self, dir: Direction, term: Term, op: CsrOperator)
        -> GrapeResult<()>
    {
        self.store.set(dir, term, op)
    }

    fn check_states(&self, what: &'static str, states: &nd::ArrayView2<C64>)
        -> GrapeResult<()>
    {
        let (n, d) = states.dim();
        if n != self.config.nstate {
            return Err(GrapeError::mismatch(what, self.config.nstate, n));
        }
        if d != self.config.dim {
            return Err(GrapeError::mismatch(what, self.config.dim, d));
        }
        Ok(())
    }

    /// Seed every trajectory with an initial state and a target state, both
    /// `(nstate, dim)`.
    pub fn load_initial_states(
        &mut self,
        initial: nd::ArrayView2<C64>,
        targets: nd::ArrayView2<C64>,
    ) -> GrapeResult<()>
    {
        self.check_states("initial states", &initial)?;
        self.check_states("target states", &targets)?;
        self.initial.assign(&initial);
        self.targets.assign(&targets);
        let [fwd, bwd, mid] = &mut self.states;
        fwd.fill(C64::new(0.0, 0.0));
        bwd.fill(C64::new(0.0, 0.0));
        mid.fill(C64::new(0.0, 0.0));
        fwd.slice_mut(s![.., 0, ..]).assign(&initial);
        bwd.slice_mut(s![.., 0, ..]).assign(&targets);
        self.loaded = true;
        Ok(())
    }

    /// [`Self::load_initial_states`] from flat buffers of adjacent
    /// real/imaginary pairs, each [`Shape::states_len`] long.
    pub fn load_initial_states_flat(&mut self, initial: &[f64], targets: &[f64])
        -> GrapeResult<()>
    {
        let shape = self.configure();
        let initial = unflatten("initial states", initial, shape)?;
        let targets = unflatten("target states", targets, shape)?;
        self.load_initial_states(initial.view(), targets.view())
    }

    /// Return the full `(nstate, plen + 1, dim)` buffer of one role as left by
    /// the last call to [`Self::step`] or [`Self::propagate`].
    pub fn read_states(&self, role: Role) -> nd::ArrayView3<'_, C64> {
        self.states[role.index()].view()
    }

    /// [`Self::read_states`] as a flat buffer of adjacent real/imaginary
    /// pairs, [`Shape::trajectory_len`] long.
    pub fn read_states_flat(&self, role: Role) -> Vec<f64> {
        self.states[role.index()].iter()
            .flat_map(|z| [z.re, z.im])
            .collect()
    }

    fn check_pulse(&self, pulse: &nd::ArrayView2<f64>) -> GrapeResult<()> {
        let (plen, nctrls) = pulse.dim();
        if plen != self.config.plen {
            return Err(GrapeError::mismatch("pulse timesteps", self.config.plen, plen));
        }
        if nctrls != self.config.nctrls {
            return Err(GrapeError::mismatch(
                "pulse control channels", self.config.nctrls, nctrls));
        }
        if !self.loaded {
            return Err(GrapeError::StatesNotLoaded);
        }
        Ok(())
    }

    /// Relative norm change from the first to the last timestep of each
    /// trajectory in `role`, for trajectories whose change exceeds
    /// [`NORM_DRIFT_TOL`].
    fn norm_drifts(&self, role: Role) -> Vec<(usize, f64)> {
        let plen = self.config.plen;
        self.states[role.index()].outer_iter()
            .enumerate()
            .filter_map(|(j, traj)| {
                let n0 = norm(traj.row(0));
                (n0 > 0.0)
                    .then(|| (j, (norm(traj.row(plen)) - n0).abs() / n0))
            })
            .filter(|(_, drift)| *drift > NORM_DRIFT_TOL)
            .collect()
    }

    fn warn_norm_drift(&self, roles: &[Role]) {
        for &role in roles.iter() {
            for (j, drift) in self.norm_drifts(role) {
                warn!(
                    ?role,
                    trajectory = j,
                    drift,
                    taylor_order = self.config.taylor_order,
                    "propagated norm drifted; Taylor order may be too low for dt"
                );
            }
        }
    }

    /// Propagate every initial state forward under `pulse` (`(plen, nctrls)`)
    /// without computing gradients, returning the final states as
    /// `(nstate, dim)`.
    pub fn propagate(&mut self, pulse: nd::ArrayView2<f64>)
        -> GrapeResult<nd::Array2<C64>>
    {
        self.check_pulse(&pulse)?;
        let EngineConfig { plen, taylor_order, dt, .. } = self.config;
        let driver = TrajectoryDriver::new(&self.store, taylor_order, dt);
        let fwd = &mut self.states[Role::Forward.index()];
        fwd.slice_mut(s![.., 0, ..]).assign(&self.initial);
        driver.drive_batch(Direction::Forward, pulse, Schedule::InOrder, fwd.view_mut());
        self.warn_norm_drift(&[Role::Forward]);
        Ok(self.states[Role::Forward.index()].slice(s![.., plen, ..]).to_owned())
    }

    /// Propagate every initial state forward under `pulse` and return the
    /// sensitivity of each step's output to that step's amplitudes, as
    /// `(nstate, plen, nctrls, dim)`.
    pub fn sensitivities(&mut self, pulse: nd::ArrayView2<f64>)
        -> GrapeResult<nd::Array4<C64>>
    {
        self.check_pulse(&pulse)?;
        let EngineConfig { dim, nctrls, plen, nstate, taylor_order, dt, .. }
            = self.config;
        let driver = TrajectoryDriver::new(&self.store, taylor_order, dt);
        let mut d_states: nd::Array4<C64>
            = nd::Array4::zeros((nstate, plen, nctrls, dim));
        let fwd = &mut self.states[Role::Forward.index()];
        fwd.slice_mut(s![.., 0, ..]).assign(&self.initial);
        driver.drive_batch_with_sensitivity(
            Direction::Forward, pulse, Schedule::InOrder,
            fwd.view_mut(), d_states.view_mut(),
        );
        self.warn_norm_drift(&[Role::Forward]);
        Ok(d_states)
    }

    /// Run one full GRAPE step under `pulse` (`(plen, nctrls)`).
    ///
    /// 1. Initial states are propagated forward with the pulse in order.
    /// 2. Target states are propagated backward with the pulse reversed.
    /// 3. The two are blended into per-timestep intermediate targets.
    /// 4. Each timestep's cost and gradient are computed from the
    ///    intermediate targets, which are held fixed under differentiation.
    ///
    /// All shape checks happen before any propagation.
    pub fn step(&mut self, pulse: nd::ArrayView2<f64>) -> GrapeResult<StepOutput> {
        self.check_pulse(&pulse)?;
        let EngineConfig { nctrls, plen, nstate, taylor_order, dt, .. }
            = self.config;
        let driver = TrajectoryDriver::new(&self.store, taylor_order, dt);
        let [fwd, bwd, mid] = &mut self.states;

        fwd.slice_mut(s![.., 0, ..]).assign(&self.initial);
        driver.drive_batch(Direction::Forward, pulse, Schedule::InOrder, fwd.view_mut());
        bwd.slice_mut(s![.., 0, ..]).assign(&self.targets);
        driver.drive_batch(Direction::Backward, pulse, Schedule::Reversed, bwd.view_mut());

        nd::Zip::from(mid.outer_iter_mut())
            .and(fwd.outer_iter())
            .and(bwd.outer_iter())
            .par_for_each(|m, f, b| build_intermediate(f, b, m));

        let mut costs: nd::Array2<f64> = nd::Array2::zeros((nstate, plen));
        let mut grads: nd::Array3<f64> = nd::Array3::zeros((nstate, plen, nctrls));
        assemble(
            &self.store, taylor_order, dt, pulse, mid.view(),
            costs.view_mut(), grads.view_mut(),
        );
        self.warn_norm_drift(&[Role::Forward, Role::Backward]);

        let output = StepOutput { costs, grads };
        for (j, cost) in output.trajectory_costs().iter().enumerate() {
            trace!(trajectory = j, cost, "trajectory cost");
        }
        debug!(
            nstate,
            plen,
            total_cost = output.costs.sum(),
            grad_norm = output.grads.iter().map(|g| g * g).sum::<f64>().sqrt(),
            "step complete"
        );
        Ok(output)
    }

    /// [`Self::step`] on a flat row-major `(plen, nctrls)` pulse buffer.
    ///
    /// Returns the cost of each trajectory summed over timesteps, and the flat
    /// row-major `(nstate, plen, nctrls)` gradient buffer.
    pub fn step_flat(&mut self, pulse: &[f64]) -> GrapeResult<(Vec<f64>, Vec<f64>)> {
        let shape = self.configure();
        let pulse
            = nd::ArrayView2::from_shape((shape.plen, shape.nctrls), pulse)
            .map_err(|_| {
                GrapeError::mismatch("pulse schedule", shape.pulse_len(), pulse.len())
            })?;
        let output = self.step(pulse)?;
        let costs = output.trajectory_costs().to_vec();
        let grads = output.grads.iter().copied().collect();
        Ok((costs, grads))
    }
}

fn norm(psi: nd::ArrayView1<C64>) -> f64 {
    psi.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt()
}

fn unflatten(what: &'static str, buf: &[f64], shape: Shape)
    -> GrapeResult<nd::Array2<C64>>
{
    if buf.len() != shape.states_len() {
        return Err(GrapeError::mismatch(what, shape.states_len(), buf.len()));
    }
    let data: Vec<C64>
        = buf.iter().copied()
        .tuples()
        .map(|(re, im)| C64::new(re, im))
        .collect();
    nd::Array2::from_shape_vec((shape.nstate, shape.dim), data)
        .map_err(|_| GrapeError::mismatch(what, shape.states_len(), buf.len()))
}

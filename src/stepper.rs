//! Explicit Newmark time integration of second-order systems.
//!
//! Given a model $\ddot{x} = f(x, \dot{x}, t)$, the explicit Newmark scheme advances
//! displacement $d$, velocity $v$ and acceleration $a$ by
//!
//! $$
//! \begin{aligned}
//! d_{n+1} &= d_n + \Delta t \, v_n + \tfrac{\Delta t^2}{2} a_n, \\
//! \tilde{v} &= v_n + \Delta t (1 - \gamma) a_n, \\
//! a_{n+1} &= f(d_{n+1}, \tilde{v}, t_n), \\
//! v_{n+1} &= \tilde{v} + \Delta t \, \gamma \, a_{n+1}.
//! \end{aligned}
//! $$
//!
//! The scheme is second-order accurate for $\gamma = 1/2$ and first-order accurate otherwise.
use emin_traits::Real;
use log::debug;
use nalgebra::{DVector, DVectorView, DVectorViewMut, Scalar};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// A second-order system in explicit form, $\ddot{x} = f(x, \dot{x}, t)$.
pub trait SecondOrderModel<T: Scalar> {
    fn dim(&self) -> usize;

    /// Evaluates the acceleration $f(x, \dot{x}, t)$ into `a`.
    fn eval_acceleration(
        &mut self,
        a: DVectorViewMut<T>,
        x: DVectorView<T>,
        x_dot: DVectorView<T>,
        t: T,
    ) -> Result<(), Box<dyn Error>>;
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewmarkSettings {
    pub gamma: f64,
}

impl Default for NewmarkSettings {
    fn default() -> Self {
        Self { gamma: 0.5 }
    }
}

#[derive(Debug)]
pub enum NewmarkError {
    /// The parameter gamma must lie in `[0, 1]`.
    InvalidGamma(f64),
    /// The state does not have the dimension of the model.
    DimensionMismatch { model: usize, state: usize },
    /// The time step must be positive.
    InvalidTimeStep,
    /// Evaluating the acceleration failed.
    ModelError(Box<dyn Error>),
}

impl fmt::Display for NewmarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGamma(gamma) => write!(f, "Invalid value of gamma ({}). Gamma must be in [0, 1].", gamma),
            Self::DimensionMismatch { model, state } => {
                write!(f, "State has dimension {}, but model has dimension {}", state, model)
            }
            Self::InvalidTimeStep => write!(f, "Time step must be positive"),
            Self::ModelError(err) => write!(f, "Failed to evaluate acceleration. Error: {}", err),
        }
    }
}

impl Error for NewmarkError {}

/// The state of a second-order system at a given time.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionState<T: Scalar> {
    pub time: T,
    /// The time step that produced this state, zero for the initial state.
    pub dt: T,
    pub x: DVector<T>,
    pub x_dot: DVector<T>,
    pub x_dot_dot: DVector<T>,
    /// The order of accuracy of the step that produced this state.
    pub order: usize,
    /// The number of steps taken to reach this state.
    pub step_index: usize,
}

impl<T: Real> SolutionState<T> {
    /// The state at time `time` with the given displacement and velocity.
    ///
    /// The acceleration is computed from the model on the first step.
    pub fn initial(time: T, x: DVector<T>, x_dot: DVector<T>) -> Self {
        let n = x.len();
        Self {
            time,
            dt: T::zero(),
            x,
            x_dot,
            x_dot_dot: DVector::zeros(n),
            order: 0,
            step_index: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewmarkExplicit {
    settings: NewmarkSettings,
}

impl NewmarkExplicit {
    pub fn new(settings: NewmarkSettings) -> Result<Self, NewmarkError> {
        let gamma = settings.gamma;
        if !(0.0..=1.0).contains(&gamma) {
            return Err(NewmarkError::InvalidGamma(gamma));
        }
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &NewmarkSettings {
        &self.settings
    }

    pub fn order(&self) -> usize {
        if self.settings.gamma == 0.5 {
            2
        } else {
            1
        }
    }

    /// Advances `state` by the time step `dt`.
    ///
    /// If the model fails, the displacement, velocity and time of `state` are left unchanged.
    #[replace_float_literals(T::from_f64(literal).unwrap())]
    pub fn take_step<T: Real>(
        &self,
        model: &mut impl SecondOrderModel<T>,
        state: &mut SolutionState<T>,
        dt: T,
    ) -> Result<(), NewmarkError> {
        let n = model.dim();
        if state.x.len() != n || state.x_dot.len() != n || state.x_dot_dot.len() != n {
            return Err(NewmarkError::DimensionMismatch {
                model: n,
                state: state.x.len(),
            });
        }
        if dt <= T::zero() {
            return Err(NewmarkError::InvalidTimeStep);
        }
        let gamma = T::from_f64(self.settings.gamma).ok_or(NewmarkError::InvalidGamma(self.settings.gamma))?;

        if state.step_index == 0 {
            model
                .eval_acceleration(
                    DVectorViewMut::from(&mut state.x_dot_dot),
                    DVectorView::from(&state.x),
                    DVectorView::from(&state.x_dot),
                    state.time,
                )
                .map_err(NewmarkError::ModelError)?;
        }

        // Predictors, kept apart from the state until the acceleration is known
        let mut x_pred = state.x.clone();
        x_pred.axpy(dt, &state.x_dot, 1.0);
        x_pred.axpy(0.5 * dt * dt, &state.x_dot_dot, 1.0);
        let mut x_dot_pred = state.x_dot.clone();
        x_dot_pred.axpy(dt * (1.0 - gamma), &state.x_dot_dot, 1.0);

        let mut a_new = DVector::zeros(n);
        model
            .eval_acceleration(
                DVectorViewMut::from(&mut a_new),
                DVectorView::from(&x_pred),
                DVectorView::from(&x_dot_pred),
                state.time,
            )
            .map_err(NewmarkError::ModelError)?;

        // Corrector
        x_dot_pred.axpy(dt * gamma, &a_new, 1.0);

        state.x = x_pred;
        state.x_dot = x_dot_pred;
        state.x_dot_dot = a_new;
        state.time += dt;
        state.dt = dt;
        state.order = self.order();
        state.step_index += 1;
        Ok(())
    }

    /// Takes `num_steps` steps of size `dt` starting from `initial`.
    pub fn integrate<T: Real>(
        &self,
        model: &mut impl SecondOrderModel<T>,
        initial: SolutionState<T>,
        dt: T,
        num_steps: usize,
    ) -> Result<SolutionState<T>, NewmarkError> {
        let mut state = initial;
        for _ in 0..num_steps {
            self.take_step(model, &mut state, dt)?;
        }
        debug!(
            "Newmark integration with gamma = {} finished after {} steps",
            self.settings.gamma, state.step_index
        );
        Ok(state)
    }
}

use emin::stepper::{NewmarkError, NewmarkExplicit, NewmarkSettings, SecondOrderModel, SolutionState};
use matrixcompare::assert_scalar_eq;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use std::error::Error;

/// Free fall with constant acceleration.
struct ConstantAcceleration {
    g: f64,
    evaluations: usize,
}

impl SecondOrderModel<f64> for ConstantAcceleration {
    fn dim(&self) -> usize {
        1
    }

    fn eval_acceleration(
        &mut self,
        mut a: DVectorViewMut<f64>,
        _x: DVectorView<f64>,
        _x_dot: DVectorView<f64>,
        _t: f64,
    ) -> Result<(), Box<dyn Error>> {
        self.evaluations += 1;
        a.fill(self.g);
        Ok(())
    }
}

/// The harmonic oscillator `x'' = -x`.
struct Oscillator;

impl SecondOrderModel<f64> for Oscillator {
    fn dim(&self) -> usize {
        1
    }

    fn eval_acceleration(
        &mut self,
        mut a: DVectorViewMut<f64>,
        x: DVectorView<f64>,
        _x_dot: DVectorView<f64>,
        _t: f64,
    ) -> Result<(), Box<dyn Error>> {
        a.copy_from(&(-x));
        Ok(())
    }
}

struct Failing;

impl SecondOrderModel<f64> for Failing {
    fn dim(&self) -> usize {
        1
    }

    fn eval_acceleration(
        &mut self,
        _a: DVectorViewMut<f64>,
        _x: DVectorView<f64>,
        _x_dot: DVectorView<f64>,
        _t: f64,
    ) -> Result<(), Box<dyn Error>> {
        Err(Box::from("model failure"))
    }
}

/// Constant acceleration that fails from the given evaluation on.
struct FailsAfter {
    successful_evaluations: usize,
}

impl SecondOrderModel<f64> for FailsAfter {
    fn dim(&self) -> usize {
        1
    }

    fn eval_acceleration(
        &mut self,
        mut a: DVectorViewMut<f64>,
        _x: DVectorView<f64>,
        _x_dot: DVectorView<f64>,
        _t: f64,
    ) -> Result<(), Box<dyn Error>> {
        if self.successful_evaluations == 0 {
            return Err(Box::from("model failure"));
        }
        self.successful_evaluations -= 1;
        a.fill(1.0);
        Ok(())
    }
}

fn scalar_state(x: f64, x_dot: f64) -> SolutionState<f64> {
    SolutionState::initial(0.0, DVector::from_element(1, x), DVector::from_element(1, x_dot))
}

#[test]
fn constant_acceleration_is_integrated_exactly() {
    for gamma in [0.0, 0.5, 1.0] {
        let stepper = NewmarkExplicit::new(NewmarkSettings { gamma }).unwrap();
        let mut model = ConstantAcceleration {
            g: -9.81,
            evaluations: 0,
        };
        let state = stepper
            .integrate(&mut model, scalar_state(2.0, 3.0), 0.1, 10)
            .unwrap();

        let t = 1.0;
        assert_scalar_eq!(state.time, t, comp = abs, tol = 1e-12);
        assert_scalar_eq!(state.x[0], 2.0 + 3.0 * t - 0.5 * 9.81 * t * t, comp = abs, tol = 1e-12);
        assert_scalar_eq!(state.x_dot[0], 3.0 - 9.81 * t, comp = abs, tol = 1e-12);
        assert_eq!(state.x_dot_dot[0], -9.81);
        assert_eq!(state.step_index, 10);
        // The initial acceleration is only evaluated on the first step
        assert_eq!(model.evaluations, 11);
    }
}

#[test]
fn order_depends_on_gamma() {
    let stepper = NewmarkExplicit::new(NewmarkSettings::default()).unwrap();
    assert_eq!(stepper.order(), 2);
    let mut state = scalar_state(1.0, 0.0);
    stepper.take_step(&mut Oscillator, &mut state, 0.1).unwrap();
    assert_eq!(state.order, 2);
    assert_eq!(state.dt, 0.1);

    let stepper = NewmarkExplicit::new(NewmarkSettings { gamma: 0.75 }).unwrap();
    assert_eq!(stepper.order(), 1);
}

#[test]
fn oscillator_converges_with_second_order() {
    let stepper = NewmarkExplicit::new(NewmarkSettings::default()).unwrap();
    let error = |num_steps: usize| {
        let dt = 1.0 / num_steps as f64;
        let state = stepper
            .integrate(&mut Oscillator, scalar_state(1.0, 0.0), dt, num_steps)
            .unwrap();
        (state.x[0] - 1.0f64.cos()).abs()
    };
    let ratio = error(50) / error(100);
    assert!(ratio > 3.5 && ratio < 4.5, "ratio = {}", ratio);
}

#[test]
fn invalid_gamma_is_rejected() {
    for gamma in [-0.1, 1.5, f64::NAN] {
        let result = NewmarkExplicit::new(NewmarkSettings { gamma });
        assert!(matches!(result, Err(NewmarkError::InvalidGamma(_))));
    }
}

#[test]
fn step_errors_are_reported() {
    let stepper = NewmarkExplicit::new(NewmarkSettings::default()).unwrap();

    let mut state = scalar_state(1.0, 0.0);
    let result = stepper.take_step(&mut Failing, &mut state, 0.1);
    assert!(matches!(result, Err(NewmarkError::ModelError(_))));

    let result = stepper.take_step(&mut Oscillator, &mut state, 0.0);
    assert!(matches!(result, Err(NewmarkError::InvalidTimeStep)));

    let mut wrong_dim = SolutionState::initial(0.0, DVector::zeros(2), DVector::zeros(2));
    let result = stepper.take_step(&mut Oscillator, &mut wrong_dim, 0.1);
    assert!(matches!(
        result,
        Err(NewmarkError::DimensionMismatch { model: 1, state: 2 })
    ));
}

#[test]
fn failed_step_leaves_state_unchanged() {
    let stepper = NewmarkExplicit::new(NewmarkSettings::default()).unwrap();
    let mut state = scalar_state(0.0, 1.0);

    // The initial acceleration succeeds, the acceleration of the predicted state fails
    let mut model = FailsAfter {
        successful_evaluations: 1,
    };
    let result = stepper.take_step(&mut model, &mut state, 0.1);
    assert!(matches!(result, Err(NewmarkError::ModelError(_))));
    assert_eq!(state.x[0], 0.0);
    assert_eq!(state.x_dot[0], 1.0);
    assert_eq!(state.time, 0.0);
    assert_eq!(state.step_index, 0);

    // Retrying with a working model takes exactly one step
    let mut model = FailsAfter {
        successful_evaluations: 2,
    };
    stepper.take_step(&mut model, &mut state, 0.1).unwrap();
    assert_scalar_eq!(state.x[0], 0.1 + 0.5 * 0.01, comp = abs, tol = 1e-15);
    assert_scalar_eq!(state.x_dot[0], 1.1, comp = abs, tol = 1e-15);
    assert_eq!(state.step_index, 1);
    assert_eq!(state.time, 0.1);
}

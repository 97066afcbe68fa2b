//! Differential-equation declarations binding a state variable to its derivative.
//!
//! An [`Equation`] describes the evolution of one state variable as a pure drift
//! function `f(value, time, deps)` and, for stochastic dynamics, a pure diffusion
//! function `g(value, time, deps)` scaling a standard Wiener increment. The
//! declarations are inert data; the integrator compiles them into stepping
//! routines when the model is built.
use std::fmt;

/// A pure derivative function of (current value, current time, dependency values).
///
/// The dependency slice carries the values of the declared dependencies, in
/// declaration order. The function must not mutate external state: it is
/// re-evaluated for every entity at every step.
pub type DerivFn = Box<dyn Fn(f64, f64, &[f64]) -> f64 + Send + Sync>;

/// A reference to another state variable appearing in an equation.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Dep {
    /// The value committed at the start of the current step (synchronous semantics).
    Committed(String),
    /// The value freshly integrated earlier within the same step.
    /// Only valid for targets of equations declared earlier than the referencing one.
    Fresh(String),
}

impl Dep {
    /// Returns the name of the referenced state variable.
    pub fn name(&self) -> &str {
        match self {
            Dep::Committed(name) => name,
            Dep::Fresh(name) => name,
        }
    }
}

/// A differential-equation declaration for a single state variable.
pub struct Equation {
    // The state variable governed by the equation.
    target: String,
    // The declared dependencies, in the order the derivative functions receive them.
    deps: Vec<Dep>,
    // The deterministic derivative.
    drift: DerivFn,
    // The diffusion coefficient scaling the Wiener increment, if any.
    diffusion: Option<DerivFn>,
    // Domain bounds applied to freshly integrated values before commit.
    bounds: Option<(f64, f64)>,
}

impl Equation {
    /// Create a deterministic equation `d target / dt = drift(target, t, deps)`.
    pub fn new<F>(target: &str, drift: F) -> Self
    where
        F: Fn(f64, f64, &[f64]) -> f64 + Send + Sync + 'static,
    {
        Equation {
            target: target.to_string(),
            deps: vec![],
            drift: Box::new(drift),
            diffusion: None,
            bounds: None,
        }
    }

    /// Create a stochastic equation `d target = drift dt + diffusion dW`.
    pub fn stochastic<F, G>(target: &str, drift: F, diffusion: G) -> Self
    where
        F: Fn(f64, f64, &[f64]) -> f64 + Send + Sync + 'static,
        G: Fn(f64, f64, &[f64]) -> f64 + Send + Sync + 'static,
    {
        Equation {
            target: target.to_string(),
            deps: vec![],
            drift: Box::new(drift),
            diffusion: Some(Box::new(diffusion)),
            bounds: None,
        }
    }

    /// Declare a dependency on another state variable, read as committed at the start of the step.
    pub fn depends_on(mut self, name: &str) -> Self {
        self.deps.push(Dep::Committed(name.to_string()));
        self
    }

    /// Declare a dependency on the freshly integrated value of a variable whose
    /// equation appears earlier in the model. This is the only permitted
    /// same-step dependency; the model build rejects any other ordering.
    pub fn depends_on_fresh(mut self, name: &str) -> Self {
        self.deps.push(Dep::Fresh(name.to_string()));
        self
    }

    /// Bound the freshly integrated values to [lower, upper] before commit,
    /// e.g., to keep a gating variable inside [0, 1].
    pub fn clamped(mut self, lower: f64, upper: f64) -> Self {
        self.bounds = Some((lower, upper));
        self
    }

    /// Returns the name of the state variable governed by the equation.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Returns the declared dependencies, in order.
    pub fn deps(&self) -> &[Dep] {
        &self.deps
    }

    /// Returns the declared domain bounds, if any.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.bounds
    }

    /// Returns true if the equation declares a diffusion term.
    pub fn is_stochastic(&self) -> bool {
        self.diffusion.is_some()
    }

    /// Decompose the declaration for compilation.
    pub(crate) fn into_parts(self) -> (String, Vec<Dep>, DerivFn, Option<DerivFn>, Option<(f64, f64)>) {
        (self.target, self.deps, self.drift, self.diffusion, self.bounds)
    }
}

impl fmt::Debug for Equation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Equation")
            .field("target", &self.target)
            .field("deps", &self.deps)
            .field("stochastic", &self.is_stochastic())
            .field("bounds", &self.bounds)
            .finish()
    }
}

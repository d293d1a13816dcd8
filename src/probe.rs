//! Ordered, named probes over a fixture-friendly input.
//!
//! Host-page lookups are heuristic: several ways of finding the same thing,
//! most reliable first. Each probe either finds something or not, and the
//! first one that does wins.

pub struct Probe<I: ?Sized, T> {
    pub name: &'static str,
    run: Box<dyn Fn(&I) -> Option<T> + Send + Sync>,
}

impl<I: ?Sized, T> Probe<I, T> {
    pub fn new<F>(name: &'static str, run: F) -> Self
    where
        F: Fn(&I) -> Option<T> + Send + Sync + 'static,
    {
        Self {
            name,
            run: Box::new(run),
        }
    }

    pub fn run(&self, input: &I) -> Option<T> {
        (self.run)(input)
    }
}

impl<I: ?Sized, T> std::fmt::Debug for Probe<I, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Probe").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeMatch<T> {
    pub probe: &'static str,
    pub value: T,
}

/// Runs `probes` in order and returns the first hit, tagged with the probe name.
pub fn first_match<I: ?Sized, T>(probes: &[Probe<I, T>], input: &I) -> Option<ProbeMatch<T>> {
    probes.iter().find_map(|probe| {
        probe.run(input).map(|value| ProbeMatch {
            probe: probe.name,
            value,
        })
    })
}

/// Index of the first element satisfying `pred`, as a probe body.
pub fn position<E>(items: &[E], pred: impl Fn(&E) -> bool) -> Option<usize> {
    items.iter().position(pred)
}

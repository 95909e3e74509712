use std::collections::HashMap;

/// Slot inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Slot {
    Scalar,
    Index(usize),
    Entry(String),
}

/// Exponential moving average over scalars, arrays and named entries.
///
/// State lives in namespaces (`"amplitude"`, `"bands"`, `"fft"`, ...) so
/// unrelated signals never share history. The first value observed for a
/// slot is returned unchanged.
#[derive(Debug, Clone)]
pub struct Smoother {
    alpha: f32,
    states: HashMap<String, HashMap<Slot, f32>>,
}

impl Smoother {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: normalize_alpha(alpha),
            states: HashMap::new(),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Smooths one scalar stored under `key`.
    pub fn smooth(&mut self, key: &str, value: f32) -> f32 {
        self.smooth_with(key, value, self.alpha)
    }

    pub fn smooth_with(&mut self, key: &str, value: f32, alpha: f32) -> f32 {
        self.step(key, Slot::Scalar, value, normalize_alpha(alpha))
    }

    /// Smooths every element independently, keyed by index.
    pub fn smooth_array(&mut self, namespace: &str, values: &[f32]) -> Vec<f32> {
        let alpha = self.alpha;
        values
            .iter()
            .enumerate()
            .map(|(index, value)| self.step(namespace, Slot::Index(index), *value, alpha))
            .collect()
    }

    /// Smooths named entries independently, keyed by name.
    pub fn smooth_entries<'a>(
        &mut self,
        namespace: &str,
        entries: impl IntoIterator<Item = (&'a str, f32)>,
    ) -> Vec<(&'a str, f32)> {
        entries
            .into_iter()
            .map(|(name, value)| (name, self.smooth_entry(namespace, name, value)))
            .collect()
    }

    pub fn smooth_entry(&mut self, namespace: &str, name: &str, value: f32) -> f32 {
        self.step(namespace, Slot::Entry(name.to_string()), value, self.alpha)
    }

    /// Clears one namespace, or everything when `namespace` is `None`.
    pub fn reset(&mut self, namespace: Option<&str>) {
        match namespace {
            Some(namespace) => {
                self.states.remove(namespace);
            }
            None => self.states.clear(),
        }
    }

    fn step(&mut self, namespace: &str, slot: Slot, value: f32, alpha: f32) -> f32 {
        if !value.is_finite() {
            return self.peek(namespace, &slot).unwrap_or(0.0);
        }

        let slots = self.states.entry(namespace.to_string()).or_default();
        let current = match slots.get(&slot) {
            Some(previous) => previous + (value - previous) * alpha,
            None => value,
        };
        slots.insert(slot, current);
        current
    }

    fn peek(&self, namespace: &str, slot: &Slot) -> Option<f32> {
        self.states.get(namespace)?.get(slot).copied()
    }
}

impl Default for Smoother {
    fn default() -> Self {
        Self::new(0.35)
    }
}

fn normalize_alpha(alpha: f32) -> f32 {
    if alpha.is_finite() {
        alpha.clamp(0.0, 1.0)
    } else {
        0.35
    }
}

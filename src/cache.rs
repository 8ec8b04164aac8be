/// A driver-side copy of an instrument attribute with a validity flag.
///
/// Reads served from a valid entry skip the instrument; writes store the
/// value and mark it valid; a reset marks everything invalid again.
#[derive(Debug, Clone, Default)]
pub struct Cached<T> {
    value: T,
    valid: bool,
}

impl<T: Clone> Cached<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            valid: false,
        }
    }

    /// The value if the flag is set
    pub fn get(&self) -> Option<T> {
        self.valid.then(|| self.value.clone())
    }

    /// The stored value regardless of the flag
    pub fn value(&self) -> T {
        self.value.clone()
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.valid = true;
    }

    /// Keep the value but drop the flag
    pub fn invalidate(&mut self) {
        self.valid = false;
    }
}

/// Task queue configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// Name of the queue, shown in log lines
    pub name: Option<String>,
    /// Number of tasks the queue can hold before it reallocates
    pub capacity: usize,
    /// Upper bound on tasks run by a single `run_until_stalled` call
    pub max_tasks_per_run: Option<usize>,
}

/// Default queue capacity
pub const DEFAULT_CAPACITY: usize = 64;

impl Options {
    pub fn new() -> Options {
        Options {
            name: None,
            capacity: DEFAULT_CAPACITY,
            max_tasks_per_run: None,
        }
    }

    pub fn name(&mut self, name: String) -> &mut Options {
        self.name = Some(name);
        self
    }

    pub fn capacity(&mut self, capacity: usize) -> &mut Options {
        self.capacity = capacity;
        self
    }

    pub fn max_tasks_per_run(&mut self, budget: usize) -> &mut Options {
        self.max_tasks_per_run = Some(budget);
        self
    }
}

impl Default for Options {
    fn default() -> Options {
        Options::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let mut opts = Options::new();
        opts.name("main".into()).capacity(8).max_tasks_per_run(3);
        assert_eq!(opts.name.as_deref(), Some("main"));
        assert_eq!(opts.capacity, 8);
        assert_eq!(opts.max_tasks_per_run, Some(3));
        assert_eq!(Options::default().capacity, DEFAULT_CAPACITY);
    }
}

/// Host-supplied construction parameters for a `Vm`. Nothing here is
/// mutable after construction; to change GC behavior at runtime use the
/// `stress_gc` toggle exposed on the heap directly.
#[derive(Clone, Debug)]
pub struct Config {
  /// Bytes allocated before the first collection is triggered.
  pub gc_initial_threshold: usize,
  /// Multiplier applied to bytes surviving a collection to compute the
  /// next threshold.
  pub gc_growth_factor: f64,
  /// Initial capacity reserved for a fiber's value stack.
  pub initial_stack_capacity: usize,
  /// Per-fiber call-frame cap.
  pub max_frames: usize,
  /// Upper bound on a fiber's value stack, in slots, before a stack
  /// overflow error is raised instead of growing further.
  pub max_stack_slots: usize,
  /// Directories searched, in order, when resolving a relative module
  /// name that the host's loader doesn't recognize directly.
  pub module_search_paths: Vec<String>,
  /// Forces a full collection before every allocation. Only meant for
  /// exercising GC correctness in tests; never set this in production.
  pub stress_gc: bool,
}

impl Default for Config {
  fn default() -> Self {
    Config {
      gc_initial_threshold: 1 << 20,
      gc_growth_factor: 2.0,
      initial_stack_capacity: crate::object::fiber::DEFAULT_STACK_CAPACITY,
      max_frames: crate::object::fiber::DEFAULT_MAX_FRAMES,
      max_stack_slots: 1 << 20,
      module_search_paths: Vec::new(),
      stress_gc: false,
    }
  }
}

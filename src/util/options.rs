use crate::util::constants::*;
use crate::util::object_model::MAX_AGE;
use std::default::Default;

/// The default maximum heap size.
pub const DEFAULT_MAX_HEAP_SIZE: usize = 256 << LOG_BYTES_IN_MBYTE;
/// The default minimum heap size. When it equals the maximum, uncommit is implicitly disabled.
pub const DEFAULT_MIN_HEAP_SIZE: usize = 64 << LOG_BYTES_IN_MBYTE;
/// The default size of a young-generation local allocation buffer (4096 words).
pub const DEFAULT_YOUNG_LAB_SIZE: usize = 4096 * BYTES_IN_WORD;
/// The default size of an old-generation local allocation buffer (1024 words).
pub const DEFAULT_OLD_LAB_SIZE: usize = 1024 * BYTES_IN_WORD;
/// The default number of array elements scanned per chunk.
pub const DEFAULT_ARRAY_CHUNK_SIZE: usize = 50;

/// Prefix of environment variables that set options, e.g. `SCAVENGER_THREADS=4`.
pub const ENV_PREFIX: &str = "SCAVENGER_";

fn always_valid<T>(_: &T) -> bool {
    true
}

fn is_power_of_two_size(v: &usize) -> bool {
    v.is_power_of_two() && *v >= BYTES_IN_PAGE
}

fn is_lab_size(v: &usize) -> bool {
    *v >= 2 * OBJECT_ALIGNMENT && *v % OBJECT_ALIGNMENT == 0
}

fn is_percentage(v: &usize) -> bool {
    *v <= 100
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Tunables of the memory manager and the promotion engine. They are configured before
        /// startup, either programmatically or through `SCAVENGER_*` environment variables.
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Set an option from its snake case name. Returns false if the key is unknown, the
            /// value cannot be parsed, or the value is rejected by the validator. The option keeps
            /// its current value in those cases.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option key {}", s);
                        false
                    }
                }
            }

            /// The options with their built-in defaults, ignoring the environment.
            pub fn builtin() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Self::builtin();

                // If we have env vars that start with SCAVENGER_ and match any option (such as SCAVENGER_THREADS),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(ENV_PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    // Number of parallel GC worker threads.
    threads:                           usize [|v: &usize| *v > 0] = num_cpus::get(),
    // Maximum heap size in bytes. The address space is provisioned for this at startup.
    max_heap_size:                     usize [|v: &usize| *v >= (4 << LOG_BYTES_IN_MBYTE)] = DEFAULT_MAX_HEAP_SIZE,
    // Minimum (and initial) heap size in bytes.
    min_heap_size:                     usize [|v: &usize| *v > 0] = DEFAULT_MIN_HEAP_SIZE,
    // Ratio of old generation size to young generation size.
    new_ratio:                         usize [|v: &usize| *v > 0] = 2,
    // Ratio of eden size to the size of one survivor space.
    survivor_ratio:                    usize [|v: &usize| *v > 0] = 8,
    // Size of a young-generation local allocation buffer in bytes.
    young_lab_size:                    usize [is_lab_size] = DEFAULT_YOUNG_LAB_SIZE,
    // Size of an old-generation local allocation buffer in bytes.
    old_lab_size:                      usize [is_lab_size] = DEFAULT_OLD_LAB_SIZE,
    // Number of array elements scanned by one chunk task.
    array_chunk_size:                  usize [|v: &usize| *v > 0] = DEFAULT_ARRAY_CHUNK_SIZE,
    // Object arrays larger than this many words are scanned in chunks.
    min_array_size_for_chunking:       usize [|v: &usize| *v > 0] = 3 * DEFAULT_ARRAY_CHUNK_SIZE,
    // Objects whose age reaches this value are promoted to the old generation.
    tenuring_threshold:                usize [|v: &usize| *v <= MAX_AGE + 1] = 7,
    // Number of tasks the stealable part of a worker queue holds before spilling to overflow.
    task_queue_capacity:               usize [|v: &usize| *v > 0] = 1 << 14,
    // Mid-cycle drains stop when the stealable queue is down to this many tasks.
    drain_target_stack_size:           usize [always_valid] = 64,
    // Percentage by which eden grows when it is resized upward.
    young_generation_size_increment:   usize [is_percentage] = 20,
    // Percentage by which the old generation grows when it is resized upward.
    tenured_generation_size_increment: usize [is_percentage] = 20,
    // Shrinking uses the growth increment divided by this factor.
    size_decrement_scale_factor:       usize [|v: &usize| *v > 0] = 4,
    // Grow a generation when less than this percentage of it is free after a cycle.
    min_heap_free_ratio:               usize [is_percentage] = 40,
    // Shrink a generation when more than this percentage of it is free after a cycle.
    max_heap_free_ratio:               usize [is_percentage] = 70,
    // Granularity of physical memory commit, uncommit and mapping.
    granule_size:                      usize [is_power_of_two_size] = DEFAULT_GRANULE_SIZE,
    // Region requests up to this size are allocated from the low end of the address space.
    small_page_size:                   usize [is_power_of_two_size] = DEFAULT_GRANULE_SIZE,
    // Number of virtual views that every physical page is mapped into.
    heap_views:                        usize [|v: &usize| (1..=3).contains(v)] = 1,
    // Size of the reserved address space as a multiple of the maximum heap size.
    virtual_to_physical_ratio:         usize [|v: &usize| *v >= 1] = 16,
    // Allow returning committed memory to the operating system when the heap shrinks.
    uncommit:                          bool  [always_valid] = true,
}

impl Options {
    /// Set an option from its camel case name, e.g. `youngLabSize`.
    pub fn set_from_camelcase_str(&mut self, s: &str, val: &str) -> bool {
        trace!("Trying to process option pair: ({}, {})", s, val);

        let mut sr = String::with_capacity(s.len());
        for c in s.chars() {
            if c.is_uppercase() {
                sr.push('_');
                for c in c.to_lowercase() {
                    sr.push(c);
                }
            } else {
                sr.push(c)
            }
        }

        let result = self.set_from_str(sr.as_str(), val);

        if result {
            trace!("Validation passed");
        } else {
            trace!("Validation failed")
        }
        result
    }

    /// The minimum heap size, clamped so it never exceeds the maximum.
    pub fn effective_min_heap_size(&self) -> usize {
        self.min_heap_size.min(self.max_heap_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{serial_test, with_cleanup};

    #[test]
    fn no_env_var() {
        serial_test(|| {
            let options = Options::default();
            assert_eq!(options.young_lab_size, DEFAULT_YOUNG_LAB_SIZE);
            assert_eq!(options.array_chunk_size, DEFAULT_ARRAY_CHUNK_SIZE);
        })
    }

    #[test]
    fn with_valid_env_var() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SCAVENGER_YOUNG_LAB_SIZE", "8192");

                    let options = Options::default();
                    assert_eq!(options.young_lab_size, 8192);
                },
                || {
                    std::env::remove_var("SCAVENGER_YOUNG_LAB_SIZE");
                },
            )
        })
    }

    #[test]
    fn with_multiple_valid_env_vars() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SCAVENGER_THREADS", "3");
                    std::env::set_var("SCAVENGER_UNCOMMIT", "false");

                    let options = Options::default();
                    assert_eq!(options.threads, 3);
                    assert!(!options.uncommit);
                },
                || {
                    std::env::remove_var("SCAVENGER_THREADS");
                    std::env::remove_var("SCAVENGER_UNCOMMIT");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_value() {
        serial_test(|| {
            with_cleanup(
                || {
                    // invalid value, we cannot parse the value, so use the default value
                    std::env::set_var("SCAVENGER_ARRAY_CHUNK_SIZE", "abc");
                    // rejected by the validator
                    std::env::set_var("SCAVENGER_HEAP_VIEWS", "4");

                    let options = Options::default();
                    assert_eq!(options.array_chunk_size, DEFAULT_ARRAY_CHUNK_SIZE);
                    assert_eq!(options.heap_views, 1);
                },
                || {
                    std::env::remove_var("SCAVENGER_ARRAY_CHUNK_SIZE");
                    std::env::remove_var("SCAVENGER_HEAP_VIEWS");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_key() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("SCAVENGER_ABC", "42");

                    let options = Options::default();
                    assert_eq!(options.old_lab_size, DEFAULT_OLD_LAB_SIZE);
                },
                || {
                    std::env::remove_var("SCAVENGER_ABC");
                },
            )
        })
    }

    #[test]
    fn camelcase_keys() {
        let mut options = Options::builtin();
        assert!(options.set_from_camelcase_str("tenuringThreshold", "3"));
        assert_eq!(options.tenuring_threshold, 3);
        assert!(!options.set_from_camelcase_str("youngLabSize", "17"));
        assert_eq!(options.young_lab_size, DEFAULT_YOUNG_LAB_SIZE);
        assert!(!options.set_from_camelcase_str("noSuchOption", "1"));
    }

    #[test]
    fn min_heap_is_clamped() {
        let mut options = Options::builtin();
        options.max_heap_size = 8 << LOG_BYTES_IN_MBYTE;
        options.min_heap_size = 16 << LOG_BYTES_IN_MBYTE;
        assert_eq!(options.effective_min_heap_size(), options.max_heap_size);
    }
}

//! Optional `perf-map` support: appends every emitted block's host address
//! range to a `/tmp/perf-<pid>.map`-style symbol file, the format `perf
//! report` resolves JIT-generated code against the same way it resolves any
//! ELF symbol (spec §6, feature `perf-map`).
//!
//! Gated behind the `perf-map` Cargo feature rather than `Config::
//! enable_perf_map` alone: the feature controls whether any of this ever
//! touches the filesystem, the config field controls whether a given `Jit`
//! opts in once the capability is compiled in.

#[cfg(feature = "perf-map")]
mod imp {
    use std::fs::OpenOptions;
    use std::io::{self, Write};
    use std::path::{Path, PathBuf};

    pub struct PerfMap {
        file: std::fs::File,
    }

    impl PerfMap {
        pub fn open(path: Option<&Path>) -> io::Result<Self> {
            let path = match path {
                Some(p) => p.to_path_buf(),
                None => default_path(),
            };
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(PerfMap { file })
        }

        /// One line per compiled block: `<host_addr> <size> <name>`, all
        /// hex except the name, matching the format `perf` expects from
        /// `/tmp/perf-<pid>.map`.
        pub fn record(&mut self, host_addr: usize, size: usize, guest_pc: u64) {
            let _ = writeln!(self.file, "{host_addr:x} {size:x} jit_block_{guest_pc:x}");
        }
    }

    fn default_path() -> PathBuf {
        PathBuf::from(format!("/tmp/perf-{}.map", std::process::id()))
    }
}

#[cfg(feature = "perf-map")]
pub use imp::PerfMap;

/// Feature-disabled stand-in: `Jit` can unconditionally hold and call into
/// a `PerfMap` without the `dynarmic` crate itself needing to mirror the
/// `perf-map` feature.
#[cfg(not(feature = "perf-map"))]
pub struct PerfMap;

#[cfg(not(feature = "perf-map"))]
impl PerfMap {
    pub fn open(_path: Option<&std::path::Path>) -> std::io::Result<Self> {
        Ok(PerfMap)
    }

    pub fn record(&mut self, _host_addr: usize, _size: usize, _guest_pc: u64) {}
}

#[cfg(all(test, feature = "perf-map"))]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn record_appends_a_line_per_block() {
        let dir = std::env::temp_dir().join(format!("dynarmic-perf-map-test-{}", std::process::id()));
        let mut map = PerfMap::open(Some(&dir)).unwrap();
        map.record(0x1000, 0x20, 0xdead);
        drop(map);
        let mut contents = String::new();
        std::fs::File::open(&dir).unwrap().read_to_string(&mut contents).unwrap();
        assert!(contents.contains("1000 20 jit_block_dead"));
        let _ = std::fs::remove_file(&dir);
    }
}

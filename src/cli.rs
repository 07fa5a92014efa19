//! CLI argument parsing and help text

pub fn wants_help(args: &[String]) -> bool {
    args.iter()
        .skip(1)
        .any(|a| a == "-h" || a == "--help" || a == "help")
}

pub fn wants_version(args: &[String]) -> bool {
    args.iter()
        .skip(1)
        .any(|a| a == "-V" || a == "--version" || a == "version")
}

pub fn print_help() {
    println!("indexstore-rs");
    println!();
    println!("Persistent, incrementally-updated source-code symbol index over");
    println!("compiler-indexer artifacts (spec: a KV-backed unit/USR/occurrence store).");
    println!();
    println!("Usage:");
    println!("  indexstore-rs");
    println!("  indexstore-rs --help");
    println!("  indexstore-rs --version");
    println!();
    println!("Required env:");
    println!("  STORE_ROOT=/absolute/path/to/store");
    println!();
    println!("Common env (defaults shown):");
    println!("  READONLY=false                        (default: false)");
    println!("  INITIAL_MAP_SIZE_BYTES=67108864        (default: 64 MiB)");
    println!("  MAX_MAP_GROWTHS=6");
    println!("  EXPLICIT_OUTPUT_MODE=false             (default: false; main-file visibility)");
    println!("  WATCH_MODE=true|false                  (default: true)");
    println!("  WATCH_DEBOUNCE_MS=250");
    println!("  WATCH_ROOTS=/path/a,/path/b             (default: STORE_ROOT only)");
    println!("  INGEST_BATCH_SIZE=10");
    println!("  METRICS_ENABLED=true|false              (default: true)");
    println!("  METRICS_PORT=9090");
    println!("  CLIENT_API_PORT=8080");
    println!();
    println!("Visibility modes (spec §4.8, mutually exclusive):");
    println!("  - Main-file mode (default): visibility tracks registerMainFiles/");
    println!("    unregisterMainFiles calls.");
    println!("  - Explicit-output mode (EXPLICIT_OUTPUT_MODE=true): visibility tracks");
    println!("    addUnitOutFilePaths/removeUnitOutFilePaths calls instead.");
}

pub fn print_version() {
    println!("{}", env!("CARGO_PKG_VERSION"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wants_help_and_version_detect_common_flags() {
        assert!(wants_help(&["bin".to_string(), "--help".to_string()]));
        assert!(wants_help(&["bin".to_string(), "-h".to_string()]));
        assert!(wants_version(&["bin".to_string(), "--version".to_string()]));
        assert!(wants_version(&["bin".to_string(), "-V".to_string()]));
        assert!(!wants_help(&["bin".to_string()]));
        assert!(!wants_version(&["bin".to_string()]));
    }
}

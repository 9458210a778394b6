use owo_colors::OwoColorize;

pub mod shutdown;

/// Writes the readiness marker consumed by the cluster's liveness probe.
pub fn signal_ready() {
    std::fs::write("/etc/ready", "ready").expect("Failed to write readiness file");
}

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

pub mod response {
    use std::fmt::{Debug, Display};

    use super::*;

    pub fn print_error<T>(e: T)
    where
        T: Display + Debug,
    {
        eprintln!(
            "{}",
            format!("{:?}", e)
                .split('\n')
                .map(|s| s.red().to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }

    pub fn print_warning<T>(e: T)
    where
        T: Display + Debug,
    {
        eprintln!(
            "{}",
            format!("{:?}", e)
                .split('\n')
                .map(|s| s.yellow().to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        );
    }
}

use colored::Colorize;

/// User-facing output formatting, gated on the same verbose/quiet flags the
/// rest of the crate threads through `InstallOptions` in the install path.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub verbose: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self { verbose, quiet }
    }

    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{}", message.cyan());
        }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{}", message.green());
        }
    }

    pub fn warn(&self, message: &str) {
        if !self.quiet {
            eprintln!("{}", message.yellow());
        }
    }

    pub fn error(&self, message: &str) {
        eprintln!("{}", message.red());
    }

    pub fn debug(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("{}", message.dimmed());
        }
    }
}

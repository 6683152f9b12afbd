//! termrun isatty shim
//!
//! Interactive CLI tools often ask "is stdout a terminal?" before deciding to
//! emit colour or progress output. A child launched over pipes answers no. This
//! crate rewrites an interpreter invocation into an inline-code invocation whose
//! preamble forces that predicate to report true inside the child, while keeping
//! the caller's argv, working directory and exit code semantics.
//!
//! ## Architecture
//!
//! 1. `interpreter` decides whether argv[0] names a supported interpreter
//! 2. `invocation` classifies the remaining arguments (flags, module, script, other)
//! 3. `script` generates the inline program for that classification
//! 4. [`rewrite_for_tty`] assembles `[argv0, flags.., -c, program]`
//!
//! The patch is only ever text handed to the child; nothing here touches the
//! host's own standard streams.
//!
//! ```rust
//! let argv = vec!["python3".to_string(), "-m".to_string(), "pip".to_string()];
//! let rewritten = termrun_shim::rewrite_for_tty(&argv, None);
//! assert_eq!(rewritten[1], "-c");
//! ```

mod interpreter;
mod invocation;
mod script;

pub use interpreter::{is_supported_interpreter, INLINE_CODE_FLAG};
pub use invocation::{classify, Invocation};
pub use script::generate_program;

use std::path::Path;

/// Rewrite `argv` so the invoked interpreter believes its standard streams are
/// terminals. Returns `argv` unchanged when it does not target a supported
/// interpreter or already carries inline code.
///
/// `cwd` is the directory the child will run in; it is used to decide whether a
/// positional argument names an existing script file.
pub fn rewrite_for_tty(argv: &[String], cwd: Option<&Path>) -> Vec<String> {
    let invocation = classify(argv, cwd);
    let Some(program) = generate_program(&invocation) else {
        return argv.to_vec();
    };

    let mut rewritten = Vec::with_capacity(invocation.leading_flags().len() + 3);
    rewritten.push(argv[0].clone());
    rewritten.extend(invocation.leading_flags().iter().cloned());
    rewritten.push(INLINE_CODE_FLAG.to_string());
    rewritten.push(program);

    log::debug!(
        "isatty shim rewrote {} invocation ({})",
        argv[0],
        invocation.kind_name()
    );
    rewritten
}

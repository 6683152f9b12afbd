//! Classification of an interpreter argv.

use crate::interpreter::is_supported_interpreter;
use std::path::Path;

const SCRIPT_SUFFIXES: [&str; 2] = [".py", ".pyw"];

/// Long options whose value is the following argument.
const LONG_OPTIONS_WITH_VALUE: [&str; 1] = ["--check-hash-based-pycs"];

/// What an argv asks the interpreter to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// argv[0] is not a supported interpreter.
    NotInterpreter,
    /// The caller already passes inline code and controls the entry point.
    AlreadyInline,
    /// Bare interpreter with no further arguments.
    Interactive,
    /// `-m module args...`
    Module {
        flags: Vec<String>,
        module: String,
        args: Vec<String>,
    },
    /// `script.py args...`
    Script {
        flags: Vec<String>,
        script: String,
        args: Vec<String>,
    },
    /// Anything else; `args` is every original argument after argv[0].
    Delegate { flags: Vec<String>, args: Vec<String> },
}

impl Invocation {
    /// Interpreter flags that precede the entry point and stay on the outer argv.
    pub fn leading_flags(&self) -> &[String] {
        match self {
            Self::Module { flags, .. } | Self::Script { flags, .. } | Self::Delegate { flags, .. } => {
                flags
            }
            Self::NotInterpreter | Self::AlreadyInline | Self::Interactive => &[],
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NotInterpreter => "not-interpreter",
            Self::AlreadyInline => "already-inline",
            Self::Interactive => "interactive",
            Self::Module { .. } => "module",
            Self::Script { .. } => "script",
            Self::Delegate { .. } => "delegate",
        }
    }
}

enum Cluster {
    Plain,
    Inline,
    Module {
        prefix: String,
        inline_name: Option<String>,
    },
    Value {
        inline: bool,
    },
}

/// Walk a short-option cluster (`-uBm`, `-Wignore`) the way the interpreter does:
/// the first option that takes an argument ends the cluster.
fn scan_cluster(cluster: &str) -> Cluster {
    for (idx, c) in cluster.char_indices() {
        let tail = &cluster[idx + c.len_utf8()..];
        match c {
            'c' => return Cluster::Inline,
            'm' => {
                return Cluster::Module {
                    prefix: cluster[..idx].to_string(),
                    inline_name: (!tail.is_empty()).then(|| tail.to_string()),
                }
            }
            'W' | 'X' => {
                return Cluster::Value {
                    inline: !tail.is_empty(),
                }
            }
            _ => {}
        }
    }
    Cluster::Plain
}

fn looks_like_script(candidate: &str, cwd: Option<&Path>) -> bool {
    let lower = candidate.to_ascii_lowercase();
    if SCRIPT_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix)) {
        return true;
    }
    let path = Path::new(candidate);
    match cwd {
        Some(dir) if path.is_relative() => dir.join(path).is_file(),
        _ => path.is_file(),
    }
}

/// Classify `argv` for the isatty rewrite.
pub fn classify(argv: &[String], cwd: Option<&Path>) -> Invocation {
    let Some(program) = argv.first() else {
        return Invocation::NotInterpreter;
    };
    if !is_supported_interpreter(program) {
        return Invocation::NotInterpreter;
    }

    let rest = &argv[1..];
    if rest.is_empty() {
        return Invocation::Interactive;
    }

    let mut flags = Vec::new();
    let mut i = 0;
    while i < rest.len() {
        let token = &rest[i];
        if token == "--" {
            i += 1;
            break;
        }
        if token == "-" || !token.starts_with('-') {
            break;
        }

        if token.starts_with("--") {
            flags.push(token.clone());
            if LONG_OPTIONS_WITH_VALUE.contains(&token.as_str()) {
                if let Some(value) = rest.get(i + 1) {
                    flags.push(value.clone());
                    i += 1;
                }
            }
            i += 1;
            continue;
        }

        match scan_cluster(&token[1..]) {
            Cluster::Plain => {
                flags.push(token.clone());
                i += 1;
            }
            Cluster::Inline => return Invocation::AlreadyInline,
            Cluster::Value { inline } => {
                flags.push(token.clone());
                if !inline {
                    if let Some(value) = rest.get(i + 1) {
                        flags.push(value.clone());
                        i += 1;
                    }
                }
                i += 1;
            }
            Cluster::Module {
                prefix,
                inline_name,
            } => {
                if !prefix.is_empty() {
                    flags.push(format!("-{prefix}"));
                }
                let (module, next) = match inline_name {
                    Some(name) => (name, i + 1),
                    None => match rest.get(i + 1) {
                        Some(name) => (name.clone(), i + 2),
                        // `-m` without a name: let the interpreter report it.
                        None => {
                            return Invocation::Delegate {
                                flags,
                                args: rest.to_vec(),
                            }
                        }
                    },
                };
                return Invocation::Module {
                    flags,
                    module,
                    args: rest[next..].to_vec(),
                };
            }
        }
    }

    match rest.get(i) {
        Some(candidate) if candidate != "-" && looks_like_script(candidate, cwd) => {
            Invocation::Script {
                flags,
                script: candidate.clone(),
                args: rest[i + 1..].to_vec(),
            }
        }
        _ => Invocation::Delegate {
            flags,
            args: rest.to_vec(),
        },
    }
}

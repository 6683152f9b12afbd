//! Inline program generation.

use crate::invocation::Invocation;
use std::fmt::Write as _;

/// Forces `isatty()` to report true on the standard streams and on fds 0-2.
const ISATTY_PREAMBLE: &str = "\
import os, sys
def _termrun_isatty(*_args, **_kwargs):
    return True
for _name in ('stdin', 'stdout', 'stderr', '__stdin__', '__stdout__', '__stderr__'):
    _stream = getattr(sys, _name, None)
    if _stream is None:
        continue
    try:
        _stream.isatty = _termrun_isatty
    except (AttributeError, TypeError):
        pass
_termrun_os_isatty = os.isatty
def _termrun_fd_isatty(fd):
    if fd in (0, 1, 2):
        return True
    return _termrun_os_isatty(fd)
os.isatty = _termrun_fd_isatty
del _name, _stream
";

/// Quote `value` as a single-quoted interpreter string literal.
pub(crate) fn py_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn py_list<'a>(items: impl IntoIterator<Item = &'a String>) -> String {
    let quoted: Vec<String> = items.into_iter().map(|item| py_literal(item)).collect();
    format!("[{}]", quoted.join(", "))
}

fn interactive_body() -> String {
    "import code\n\
     code.interact(banner='', local={'__name__': '__console__', '__doc__': None}, exitmsg='')\n"
        .to_string()
}

fn module_body(module: &str, args: &[String]) -> String {
    let argv = py_list(std::iter::once(&module.to_string()).chain(args));
    format!(
        "import runpy\n\
         sys.argv = {argv}\n\
         runpy.run_module({name}, run_name='__main__', alter_sys=True)\n",
        name = py_literal(module),
    )
}

fn script_body(script: &str, args: &[String]) -> String {
    let argv = py_list(std::iter::once(&script.to_string()).chain(args));
    let path = py_literal(script);
    format!(
        "sys.argv = {argv}\n\
         _termrun_script = {path}\n\
         if not os.path.exists(_termrun_script):\n\
         \x20   sys.stderr.write(\"%s: can't open file %r: [Errno 2] No such file or directory\\n\" % (os.path.basename(sys.executable), os.path.abspath(_termrun_script)))\n\
         \x20   sys.exit(2)\n\
         _termrun_cwd = os.getcwd()\n\
         _termrun_dir = os.path.dirname(os.path.abspath(_termrun_script))\n\
         sys.path.insert(0, _termrun_dir)\n\
         try:\n\
         \x20   if os.path.isabs(_termrun_script):\n\
         \x20       os.chdir(_termrun_dir)\n\
         \x20   with open(_termrun_script, 'rb') as _termrun_file:\n\
         \x20       _termrun_source = _termrun_file.read()\n\
         \x20   _termrun_globals = {{'__name__': '__main__', '__file__': _termrun_script, '__builtins__': __builtins__}}\n\
         \x20   exec(compile(_termrun_source, _termrun_script, 'exec'), _termrun_globals)\n\
         finally:\n\
         \x20   os.chdir(_termrun_cwd)\n"
    )
}

fn delegate_body(args: &[String]) -> String {
    format!(
        "import subprocess\n\
         sys.exit(subprocess.call([sys.executable] + {args}, env=dict(os.environ)))\n",
        args = py_list(args),
    )
}

/// Inline program for `invocation`, or `None` when the invocation must run as is.
pub fn generate_program(invocation: &Invocation) -> Option<String> {
    let body = match invocation {
        Invocation::NotInterpreter | Invocation::AlreadyInline => return None,
        Invocation::Interactive => interactive_body(),
        Invocation::Module { module, args, .. } => module_body(module, args),
        Invocation::Script { script, args, .. } => script_body(script, args),
        Invocation::Delegate { args, .. } => delegate_body(args),
    };
    Some(format!("{ISATTY_PREAMBLE}{body}"))
}

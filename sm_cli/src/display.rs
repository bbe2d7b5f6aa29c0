//! Output formatting helpers.

use console::style;

use sm_io::ListResult;

pub fn header(msg: &str) {
    println!("{} {}", style("==>").cyan().bold(), msg);
}

pub fn success(msg: &str) {
    println!("    {} {}", style("✓").green(), msg);
}

pub fn warning(msg: &str) {
    eprintln!("{} {}", style("warning:").yellow().bold(), msg);
}

/// Lay out a command line with each flag on its own line next to its value.
pub fn format_command(program: &str, args: &[String]) -> String {
    let mut out = format!("\t{}\n", program);
    let mut pending_flag = false;
    for arg in args {
        if arg.starts_with('-') {
            if pending_flag {
                out.push('\n');
            }
            out.push_str("\t\t");
            out.push_str(arg);
            pending_flag = true;
        } else if pending_flag {
            out.push(' ');
            out.push_str(arg);
            out.push('\n');
            pending_flag = false;
        } else {
            out.push_str("\t\t");
            out.push_str(arg);
            out.push('\n');
        }
    }
    if pending_flag {
        out.push('\n');
    }
    out
}

fn section(out: &mut String, title: &str, names: &[String]) {
    out.push_str(title);
    out.push_str("\n\n");
    if names.is_empty() {
        out.push_str("\t(none)\n");
    }
    for name in names {
        out.push('\t');
        out.push_str(name);
        out.push('\n');
    }
    out.push('\n');
}

/// The body of `serviceman list`.
pub fn format_list(result: &ListResult, all: bool) -> String {
    let mut out = String::new();
    section(&mut out, "serviceman-managed services:", &result.managed);
    if all {
        section(&mut out, "other services:", &result.others);
    }
    out
}

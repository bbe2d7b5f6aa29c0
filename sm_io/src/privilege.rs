use crate::runnable::Runnable;

/// Prefix every command with `sudo` when a system-scope action is taken by
/// an unprivileged caller.
pub fn adjust_privileges(system: bool, privileged: bool, cmds: Vec<Runnable>) -> Vec<Runnable> {
    if !system || privileged {
        return cmds;
    }
    cmds.into_iter()
        .map(|cmd| {
            let mut args = Vec::with_capacity(cmd.args.len() + 1);
            args.push(cmd.program);
            args.extend(cmd.args);
            Runnable {
                program: "sudo".to_string(),
                args,
                ..cmd
            }
        })
        .collect()
}

/// Whether the current process may act on system-scope services directly.
#[cfg(unix)]
pub fn is_privileged() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(windows)]
pub fn is_privileged() -> bool {
    // `net session` only succeeds from an elevated prompt.
    std::process::Command::new("net")
        .arg("session")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(any(unix, windows)))]
pub fn is_privileged() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cmds() -> Vec<Runnable> {
        vec![
            Runnable::best_effort("systemctl", ["daemon-reload"]),
            Runnable::must("systemctl", ["start", "demo.service"]).badwords(&["failed"]),
        ]
    }

    #[test]
    fn unprivileged_system_action_gets_sudo() {
        let adjusted = adjust_privileges(true, false, cmds());

        assert_eq!(adjusted[0].program, "sudo");
        assert_eq!(adjusted[0].args, vec!["systemctl", "daemon-reload"]);
        assert!(!adjusted[0].must);
        assert_eq!(adjusted[1].args, vec!["systemctl", "start", "demo.service"]);
        assert_eq!(adjusted[1].badwords, vec!["failed"]);
        assert!(adjusted[1].must);
    }

    #[test]
    fn user_scope_and_root_are_untouched() {
        assert_eq!(adjust_privileges(false, false, cmds()), cmds());
        assert_eq!(adjust_privileges(true, true, cmds()), cmds());
        assert_eq!(adjust_privileges(false, true, cmds()), cmds());
    }

    proptest! {
        #[test]
        fn sudo_keeps_the_original_command_line(
            program in "[a-z]{1,12}",
            args in prop::collection::vec("[ -~]{0,16}", 0..6),
            must in any::<bool>(),
        ) {
            let cmd = if must {
                Runnable::must(&program, args.clone())
            } else {
                Runnable::best_effort(&program, args.clone())
            };
            let adjusted = adjust_privileges(true, false, vec![cmd]);

            prop_assert_eq!(adjusted.len(), 1);
            prop_assert_eq!(&adjusted[0].program, "sudo");
            prop_assert_eq!(&adjusted[0].args[0], &program);
            prop_assert_eq!(&adjusted[0].args[1..], args.as_slice());
            prop_assert_eq!(adjusted[0].must, must);
        }
    }
}

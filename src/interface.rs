//! Textual command adapter.
//!
//! A thin dispatch layer over the agent API for hosts that speak lines
//! of text: debuggers, REPLs, and remote shells. The result is a
//! `(output, success)` pair; the kernel itself never parses commands.

use std::sync::OnceLock;

use regex::Regex;

use crate::agent::{Agent, RunUnit};
use crate::config::LearnMode;
use crate::symbol::Symbol;

fn count_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+$").expect("static pattern"))
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]\d+$").expect("static pattern"))
}

/// Executes one command line against an agent.
///
/// Commands: `sp {…}`, `run [n] [decision|elaboration|phase]`, `init`,
/// `excise <name>|-all`, `print [name|id]`, `wmes [id]`,
/// `preferences <id> <attr>`, `learn [on|off]`, `stats`, `stop`.
pub fn execute_command_line(agent: &mut Agent, line: &str) -> (String, bool) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return (String::new(), true);
    }

    let command = trimmed.split_whitespace().next().unwrap_or_default();
    let rest: Vec<&str> = trimmed.split_whitespace().skip(1).collect();

    match command {
        "sp" => match agent.load_productions(trimmed) {
            Ok(count) => (
                format!(
                    "{count} production{} loaded.",
                    if count == 1 { "" } else { "s" }
                ),
                true,
            ),
            Err(e) => (format!("{e}"), false),
        },

        "run" => run_command(agent, &rest),

        "init" => {
            agent.init();
            ("Agent reinitialized.".to_string(), true)
        }

        "excise" => match rest.first() {
            Some(&"-all" | &"--all") => {
                let retracted = agent.excise_all();
                (format!("All productions excised ({retracted} retractions)."), true)
            }
            Some(name) => match agent.excise_production(name) {
                Ok(retracted) => (
                    format!("Production '{name}' excised ({retracted} retractions)."),
                    true,
                ),
                Err(e) => (format!("{e}"), false),
            },
            None => ("excise: expected a production name or -all".to_string(), false),
        },

        "print" => match rest.first() {
            None => {
                let names = agent.production_names();
                if names.is_empty() {
                    ("No productions loaded.".to_string(), true)
                } else {
                    (names.join("\n"), true)
                }
            }
            Some(arg) if identifier_regex().is_match(arg) => match lookup_identifier(agent, arg) {
                Some(id) => (format_wmes(agent, Some(&id)), true),
                None => (format!("No identifier named {arg}."), false),
            },
            Some(name) => match agent.production(name) {
                Some(p) => (p.to_string(), true),
                None => (format!("No production named '{name}'."), false),
            },
        },

        "wmes" => match rest.first() {
            None => (format_wmes(agent, None), true),
            Some(arg) => match lookup_identifier(agent, arg) {
                Some(id) => (format_wmes(agent, Some(&id)), true),
                None => (format!("No identifier named {arg}."), false),
            },
        },

        "preferences" => {
            let (Some(id_arg), Some(attr_arg)) = (rest.first(), rest.get(1)) else {
                return (
                    "preferences: expected an identifier and an attribute".to_string(),
                    false,
                );
            };
            let Some(id) = lookup_identifier(agent, id_arg) else {
                return (format!("No identifier named {id_arg}."), false);
            };
            let attr = agent.str_sym(*attr_arg);
            let prefs = agent.preferences_for(&id, &attr);
            if prefs.is_empty() {
                (format!("No preferences for ({id} ^{attr})."), true)
            } else {
                let lines: Vec<String> = prefs.iter().map(ToString::to_string).collect();
                (lines.join("\n"), true)
            }
        }

        "learn" => match rest.first() {
            None => (
                format!("learn: {:?}", agent.config().learn).to_lowercase(),
                true,
            ),
            Some(&"on") => {
                agent.config_mut().learn = LearnMode::On;
                ("Learning enabled.".to_string(), true)
            }
            Some(&"off") => {
                agent.config_mut().learn = LearnMode::Off;
                ("Learning disabled.".to_string(), true)
            }
            Some(other) => (format!("learn: unknown argument '{other}'"), false),
        },

        "stats" => match serde_json::to_string_pretty(agent.stats()) {
            Ok(json) => (json, true),
            Err(e) => (format!("stats: {e}"), false),
        },

        "stop" => {
            agent.request_stop();
            ("Stop requested.".to_string(), true)
        }

        other => (format!("Unknown command: {other}"), false),
    }
}

fn run_command(agent: &mut Agent, args: &[&str]) -> (String, bool) {
    let mut count: u64 = 1;
    let mut unit = RunUnit::Decision;

    for arg in args {
        if count_regex().is_match(arg) {
            match arg.parse() {
                Ok(n) => count = n,
                Err(_) => return (format!("run: bad count '{arg}'"), false),
            }
        } else {
            unit = match *arg {
                "d" | "decision" | "decisions" => RunUnit::Decision,
                "e" | "elaboration" | "elaborations" => RunUnit::Elaboration,
                "p" | "phase" | "phases" => RunUnit::Phase,
                other => return (format!("run: unknown unit '{other}'"), false),
            };
        }
    }

    agent.run(count, unit);
    let stats = agent.stats();
    (
        format!(
            "Ran. Decisions: {}, elaborations: {}.",
            stats.decision_cycles, stats.elaboration_cycles
        ),
        true,
    )
}

fn lookup_identifier(agent: &Agent, printed: &str) -> Option<Symbol> {
    if !identifier_regex().is_match(printed) {
        return None;
    }
    agent.find_identifier(printed)
}

fn format_wmes(agent: &Agent, id: Option<&Symbol>) -> String {
    let wmes = match id {
        Some(id) => agent.wmes_of(id),
        None => agent.wmes(),
    };
    if wmes.is_empty() {
        return "No working memory elements.".to_string();
    }
    let lines: Vec<String> = wmes.iter().map(|w| w.to_string()).collect();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn agent() -> Agent {
        Agent::new("cli", AgentConfig::default().with_seed(3))
    }

    #[test]
    fn test_sp_and_print() {
        let mut a = agent();
        let (out, ok) =
            execute_command_line(&mut a, "sp {p (state <s> ^superstate nil) --> (<s> ^x 1)}");
        assert!(ok, "{out}");
        assert_eq!(out, "1 production loaded.");

        let (out, ok) = execute_command_line(&mut a, "print p");
        assert!(ok);
        assert!(out.starts_with("sp {p"));

        let (out, ok) = execute_command_line(&mut a, "print");
        assert!(ok);
        assert_eq!(out, "p");
    }

    #[test]
    fn test_run_and_stats() {
        let mut a = agent();
        let (_, ok) = execute_command_line(&mut a, "run 2 d");
        assert!(ok);
        assert_eq!(a.stats().decision_cycles, 2);

        let (out, ok) = execute_command_line(&mut a, "stats");
        assert!(ok);
        assert!(out.contains("\"decision_cycles\": 2"));
    }

    #[test]
    fn test_wmes_and_identifier_print() {
        let mut a = agent();
        let (out, ok) = execute_command_line(&mut a, "wmes");
        assert!(ok);
        assert!(out.contains("^superstate nil"));

        let top = a.top_state().to_string();
        let (out, ok) = execute_command_line(&mut a, &format!("print {top}"));
        assert!(ok);
        assert!(out.contains("^io"));
    }

    #[test]
    fn test_excise_and_unknown() {
        let mut a = agent();
        execute_command_line(&mut a, "sp {p (state <s> ^superstate nil) --> (<s> ^x 1)}");
        let (out, ok) = execute_command_line(&mut a, "excise p");
        assert!(ok, "{out}");
        let (_, ok) = execute_command_line(&mut a, "excise p");
        assert!(!ok);
        let (_, ok) = execute_command_line(&mut a, "frobnicate");
        assert!(!ok);
    }

    #[test]
    fn test_learn_toggle() {
        let mut a = agent();
        let (_, ok) = execute_command_line(&mut a, "learn on");
        assert!(ok);
        assert_eq!(a.config().learn, LearnMode::On);
        let (_, ok) = execute_command_line(&mut a, "learn off");
        assert!(ok);
        assert_eq!(a.config().learn, LearnMode::Off);
    }

    #[test]
    fn test_init_resets_wm() {
        let mut a = agent();
        execute_command_line(&mut a, "sp {p (state <s> ^superstate nil) --> (<s> ^x 1)}");
        execute_command_line(&mut a, "run 1 e");
        let before = a.wmes().len();
        let (_, ok) = execute_command_line(&mut a, "init");
        assert!(ok);
        // Fresh top state: just the architecture WMEs.
        assert!(a.wmes().len() < before);
    }
}

//! Interactive prompts for parameters not given on the command line.
//!
//! Plain line-oriented stdin prompts - no terminal takeover. Only this layer
//! talks to the user; the core receives a fully-resolved settings object.

use std::io::{BufRead, Write};

use crate::adapters::{self, Adapter};
use crate::cli::Cli;
use crate::error::Result;
use crate::settings::Preferences;

/// Fill the gaps in the parsed command line by asking the operator.
pub async fn fill_missing(cli: &mut Cli, prefs: &Preferences) -> Result<()> {
    println!("Running in interactive mode.");

    if cli.local_interface.is_none() {
        let adapters = adapters::list_adapters().await?;
        let stdin = std::io::stdin();
        let mut input = stdin.lock();

        let suggestion_local = suggest(&adapters, prefs.last_local_interface.as_deref(), |a| {
            a.addresses.is_empty()
        });
        let suggestion_internet =
            suggest(&adapters, prefs.last_internet_interface.as_deref(), |a| {
                !a.addresses.is_empty()
            });

        cli.local_interface = choose(
            &mut input,
            "Available network interfaces",
            "Select local_interface",
            &adapters,
            suggestion_local.as_deref(),
            false,
        )?;

        cli.internet_interface = choose(
            &mut input,
            "Do you want to create a bridge to allow internet access in your created network \
             over another network interface?",
            "Select internet_interface or none",
            &adapters,
            suggestion_internet.as_deref(),
            true,
        )?;

        if cli.pxe.is_none() {
            cli.pxe = ask(
                &mut input,
                "Do you want to enable booting over PXE? Enter filename to boot from",
                None,
            )?;
            if cli.pxe.is_some() {
                if let Some(rootdir) = ask(
                    &mut input,
                    "Set root directory of the TFTP server",
                    cli.tftp.tftp_rootdir.to_str(),
                )? {
                    cli.tftp.tftp_rootdir = rootdir.into();
                }
            }
        }
    }

    Ok(())
}

/// Pick a suggested adapter: the last-used one if it still exists, otherwise
/// the first adapter matching `preferred`.
fn suggest(
    adapters: &[Adapter],
    last_used: Option<&str>,
    preferred: impl Fn(&Adapter) -> bool,
) -> Option<String> {
    if let Some(last) = last_used {
        if adapters.iter().any(|a| a.name == last) {
            return Some(last.to_string());
        }
    }
    adapters.iter().find(|a| preferred(a)).map(|a| a.name.clone())
}

fn describe(adapter: &Adapter) -> String {
    if adapter.addresses.is_empty() {
        "no addresses assigned".into()
    } else {
        format!("addresses: {}", adapter.addresses.join(", "))
    }
}

/// Numbered chooser over the adapter list. An empty answer picks the
/// suggestion; "none" is accepted when the choice is optional.
fn choose(
    input: &mut impl BufRead,
    header: &str,
    prompt: &str,
    adapters: &[Adapter],
    suggestion: Option<&str>,
    optional: bool,
) -> Result<Option<String>> {
    println!("{header}");
    for (index, adapter) in adapters.iter().enumerate() {
        println!("  {}) {} ({})", index + 1, adapter.name, describe(adapter));
    }

    loop {
        let default = match (suggestion, optional) {
            (Some(name), _) => format!(" [{name}]"),
            (None, true) => " [none]".into(),
            (None, false) => String::new(),
        };
        print!("{prompt}{default}: ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        let read = input.read_line(&mut line)?;
        let answer = line.trim();

        if answer.is_empty() {
            if let Some(name) = suggestion {
                return Ok(Some(name.to_string()));
            }
            if optional {
                return Ok(None);
            }
            if read == 0 {
                return Err(crate::error::LocalnetError::Config(
                    "end of input while selecting an interface".into(),
                ));
            }
            continue;
        }
        if optional && answer.eq_ignore_ascii_case("none") {
            return Ok(None);
        }
        if let Ok(number) = answer.parse::<usize>() {
            if let Some(adapter) = number.checked_sub(1).and_then(|i| adapters.get(i)) {
                return Ok(Some(adapter.name.clone()));
            }
        }
        if let Some(adapter) = adapters.iter().find(|a| a.name == answer) {
            return Ok(Some(adapter.name.clone()));
        }
        println!("No such interface: {answer}");
    }
}

/// Free-form question; an empty answer returns the default.
fn ask(input: &mut impl BufRead, prompt: &str, default: Option<&str>) -> Result<Option<String>> {
    match default {
        Some(default) => print!("{prompt} [{default}]: "),
        None => print!("{prompt} []: "),
    }
    std::io::stdout().flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim();

    if answer.is_empty() {
        return Ok(default.map(str::to_string));
    }
    Ok(Some(answer.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapters() -> Vec<Adapter> {
        vec![
            Adapter {
                name: "eth0".into(),
                addresses: vec!["192.168.1.5/24".into()],
            },
            Adapter {
                name: "veth0".into(),
                addresses: vec![],
            },
        ]
    }

    #[test]
    fn empty_answer_takes_the_suggestion() {
        let mut input = "\n".as_bytes();
        let choice = choose(
            &mut input,
            "interfaces",
            "select",
            &adapters(),
            Some("veth0"),
            false,
        )
        .unwrap();
        assert_eq!(choice.as_deref(), Some("veth0"));
    }

    #[test]
    fn numbered_and_named_answers_are_accepted() {
        let mut input = "1\n".as_bytes();
        let choice = choose(&mut input, "i", "s", &adapters(), None, false).unwrap();
        assert_eq!(choice.as_deref(), Some("eth0"));

        let mut input = "veth0\n".as_bytes();
        let choice = choose(&mut input, "i", "s", &adapters(), None, false).unwrap();
        assert_eq!(choice.as_deref(), Some("veth0"));
    }

    #[test]
    fn none_is_accepted_for_optional_choices() {
        let mut input = "none\n".as_bytes();
        let choice = choose(&mut input, "i", "s", &adapters(), Some("eth0"), true).unwrap();
        assert_eq!(choice, None);
    }

    #[test]
    fn invalid_answers_reprompt() {
        let mut input = "wlan9\n2\n".as_bytes();
        let choice = choose(&mut input, "i", "s", &adapters(), None, false).unwrap();
        assert_eq!(choice.as_deref(), Some("veth0"));
    }

    #[test]
    fn ask_returns_default_on_empty_answer() {
        let mut input = "\n".as_bytes();
        let answer = ask(&mut input, "rootdir", Some("/srv/tftp/")).unwrap();
        assert_eq!(answer.as_deref(), Some("/srv/tftp/"));

        let mut input = "pxelinux.0\n".as_bytes();
        let answer = ask(&mut input, "bootfile", None).unwrap();
        assert_eq!(answer.as_deref(), Some("pxelinux.0"));
    }

    #[test]
    fn suggestions_prefer_the_last_used_adapter() {
        let list = adapters();
        assert_eq!(
            suggest(&list, Some("eth0"), |a| a.addresses.is_empty()).as_deref(),
            Some("eth0")
        );
        // stale preference falls back to the heuristic
        assert_eq!(
            suggest(&list, Some("wlan9"), |a| a.addresses.is_empty()).as_deref(),
            Some("veth0")
        );
        assert_eq!(
            suggest(&list, None, |a| !a.addresses.is_empty()).as_deref(),
            Some("eth0")
        );
    }
}

//! Typed interpretation of resolved scheduler options.
//!
//! Options are looked up in a static table that maps each flag to the setter of the
//! corresponding [`SchedulerOptions`] field.
use std::fmt::Write;
use std::time::Duration;

use anyhow::Context;
use serde::{Serialize, Serializer};

use crate::resolve::{ArgSpec, ResolveError, ResolveResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ntasks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus_per_task: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_time_limit"
    )]
    pub time_limit: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    pub exclusive: bool,
}

type Setter = fn(&mut SchedulerOptions, &str) -> anyhow::Result<()>;

struct OptionDef {
    long: &'static str,
    short: Option<char>,
    takes_value: bool,
    set: Setter,
}

static OPTIONS: &[OptionDef] = &[
    OptionDef {
        long: "partition",
        short: Some('p'),
        takes_value: true,
        set: |opts, value| {
            opts.partition = Some(value.to_string());
            Ok(())
        },
    },
    OptionDef {
        long: "account",
        short: Some('A'),
        takes_value: true,
        set: |opts, value| {
            opts.account = Some(value.to_string());
            Ok(())
        },
    },
    OptionDef {
        long: "qos",
        short: Some('q'),
        takes_value: true,
        set: |opts, value| {
            opts.qos = Some(value.to_string());
            Ok(())
        },
    },
    OptionDef {
        long: "nodes",
        short: Some('N'),
        takes_value: true,
        set: |opts, value| {
            opts.nodes = Some(parse_count(value)?);
            Ok(())
        },
    },
    OptionDef {
        long: "ntasks",
        short: Some('n'),
        takes_value: true,
        set: |opts, value| {
            opts.ntasks = Some(parse_count(value)?);
            Ok(())
        },
    },
    OptionDef {
        long: "cpus-per-task",
        short: Some('c'),
        takes_value: true,
        set: |opts, value| {
            opts.cpus_per_task = Some(parse_count(value)?);
            Ok(())
        },
    },
    OptionDef {
        long: "mem",
        short: None,
        takes_value: true,
        set: |opts, value| {
            opts.memory = Some(parse_memory(value)?);
            Ok(())
        },
    },
    OptionDef {
        long: "time",
        short: Some('t'),
        takes_value: true,
        set: |opts, value| {
            opts.time_limit = Some(parse_slurm_time(value)?);
            Ok(())
        },
    },
    OptionDef {
        long: "job-name",
        short: Some('J'),
        takes_value: true,
        set: |opts, value| {
            opts.job_name = Some(value.to_string());
            Ok(())
        },
    },
    OptionDef {
        long: "constraint",
        short: Some('C'),
        takes_value: true,
        set: |opts, value| {
            opts.constraint = Some(value.to_string());
            Ok(())
        },
    },
    OptionDef {
        long: "exclusive",
        short: None,
        takes_value: false,
        set: |opts, _| {
            opts.exclusive = true;
            Ok(())
        },
    },
];

fn find_long(name: &str) -> Option<&'static OptionDef> {
    OPTIONS.iter().find(|def| def.long == name)
}

fn find_short(flag: char) -> Option<&'static OptionDef> {
    OPTIONS.iter().find(|def| def.short == Some(flag))
}

impl SchedulerOptions {
    /// Interprets a resolved scheduler option list.
    ///
    /// Each value can contain several whitespace separated tokens, e.g. `-p normal` or
    /// `--time=1:00:00 --exclusive`. Later options override earlier ones.
    pub fn from_args(args: &[ArgSpec]) -> ResolveResult<Self> {
        let tokens: Vec<&str> = args
            .iter()
            .filter_map(|arg| arg.value.as_deref())
            .flat_map(str::split_whitespace)
            .collect();

        let mut options = SchedulerOptions::default();
        let mut iter = tokens.into_iter();
        while let Some(token) = iter.next() {
            let (def, inline_value) = if let Some(long) = token.strip_prefix("--") {
                let (name, value) = match long.split_once('=') {
                    Some((name, value)) => (name, Some(value)),
                    None => (long, None),
                };
                (find_long(name), value)
            } else if let Some(short) = token.strip_prefix('-') {
                let mut chars = short.chars();
                let def = chars.next().and_then(find_short);
                let rest = chars.as_str();
                (def, (!rest.is_empty()).then_some(rest))
            } else {
                (None, None)
            };
            let Some(def) = def else {
                return Err(ResolveError::UnknownSchedulerOption {
                    option: token.to_string(),
                });
            };

            let value = match (def.takes_value, inline_value) {
                (true, Some(value)) => value,
                (true, None) => iter.next().ok_or_else(|| invalid(def, "missing value"))?,
                (false, None) => "",
                (false, Some(_)) => return Err(invalid(def, "option does not take a value")),
            };
            (def.set)(&mut options, value).map_err(|error| invalid(def, &format!("{error:#}")))?;
        }
        Ok(options)
    }

    /// Renders the options as `#SBATCH` directives of a batch script.
    pub fn to_sbatch_directives(&self) -> String {
        let mut script = String::new();
        let mut line = |option: &str, value: Option<String>| {
            if let Some(value) = value {
                writeln!(script, "#SBATCH --{option}={value}").unwrap_or_default();
            }
        };
        line("partition", self.partition.clone());
        line("account", self.account.clone());
        line("qos", self.qos.clone());
        line("nodes", self.nodes.map(|v| v.to_string()));
        line("ntasks", self.ntasks.map(|v| v.to_string()));
        line("cpus-per-task", self.cpus_per_task.map(|v| v.to_string()));
        line("mem", self.memory.clone());
        line("time", self.time_limit.as_ref().map(format_slurm_time));
        line("job-name", self.job_name.clone());
        line("constraint", self.constraint.clone());
        if self.exclusive {
            script.push_str("#SBATCH --exclusive\n");
        }
        script
    }
}

fn invalid(def: &OptionDef, reason: &str) -> ResolveError {
    ResolveError::InvalidSchedulerOption {
        option: format!("--{}", def.long),
        reason: reason.to_string(),
    }
}

fn parse_count(value: &str) -> anyhow::Result<u32> {
    let count: u32 = value
        .parse()
        .with_context(|| format!("`{value}` is not a number"))?;
    if count == 0 {
        anyhow::bail!("value has to be positive");
    }
    Ok(count)
}

/// Memory amount with an optional K/M/G/T suffix, e.g. `4000` or `16G`.
fn parse_memory(value: &str) -> anyhow::Result<String> {
    let digits = value.trim_end_matches(['K', 'M', 'G', 'T', 'k', 'm', 'g', 't']);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) || value.len() - digits.len() > 1 {
        anyhow::bail!("`{value}` is not a memory amount");
    }
    Ok(value.to_uppercase())
}

fn parse_u64(value: &str) -> anyhow::Result<u64> {
    value
        .parse()
        .with_context(|| format!("`{value}` is not a number"))
}

/// Parses a Slurm time limit.
///
/// Accepted formats: `minutes`, `minutes:seconds`, `hours:minutes:seconds`, `days-hours`,
/// `days-hours:minutes` and `days-hours:minutes:seconds`.
pub fn parse_slurm_time(value: &str) -> anyhow::Result<Duration> {
    let parts = |text: &str| -> anyhow::Result<Vec<u64>> { text.split(':').map(parse_u64).collect() };
    let (days, rest) = match value.split_once('-') {
        Some((days, rest)) => (Some(parse_u64(days)?), rest),
        None => (None, value),
    };
    let amounts = parts(rest)?;
    let units: &[u64] = match (days.is_some(), amounts.len()) {
        (true, 1) => &[3600],
        (true, 2) => &[3600, 60],
        (false, 1) => &[60],
        (false, 2) => &[60, 1],
        (_, 3) => &[3600, 60, 1],
        _ => anyhow::bail!("invalid time limit `{value}`"),
    };
    let seconds = amounts
        .into_iter()
        .zip(units)
        .chain(std::iter::once((days.unwrap_or(0), &86400)))
        .try_fold(0u64, |total, (amount, unit)| {
            amount
                .checked_mul(*unit)
                .and_then(|seconds| total.checked_add(seconds))
        });
    match seconds {
        Some(seconds) => Ok(Duration::from_secs(seconds)),
        None => anyhow::bail!("time limit `{value}` is too large"),
    }
}

/// Formats a duration as a Slurm time string, e.g. `01:05:02` or `2-00:00:00`.
pub fn format_slurm_time(duration: &Duration) -> String {
    let total = duration.as_secs();
    let (days, rest) = (total / 86400, total % 86400);
    let hms = format!("{:02}:{:02}:{:02}", rest / 3600, (rest % 3600) / 60, rest % 60);
    if days > 0 { format!("{days}-{hms}") } else { hms }
}

fn serialize_time_limit<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match duration {
        Some(duration) => serializer.serialize_str(&format_slurm_time(duration)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::resolve::scheduler::{SchedulerOptions, format_slurm_time, parse_slurm_time};
    use crate::resolve::{ArgSpec, ResolveError};

    fn parse(values: &[&str]) -> Result<SchedulerOptions, ResolveError> {
        let args: Vec<ArgSpec> = values.iter().map(|v| ArgSpec::anonymous(v)).collect();
        SchedulerOptions::from_args(&args)
    }

    #[test]
    fn long_and_short_forms() {
        let options = parse(&[
            "--partition=normal",
            "-A proj-1",
            "--nodes 2",
            "-c8",
            "--time=1-12:00:00",
            "--exclusive",
        ])
        .unwrap();
        assert_eq!(
            options,
            SchedulerOptions {
                partition: Some("normal".to_string()),
                account: Some("proj-1".to_string()),
                nodes: Some(2),
                cpus_per_task: Some(8),
                time_limit: Some(Duration::from_secs(36 * 3600)),
                exclusive: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn multiple_tokens_in_one_value() {
        let options = parse(&["-p gpu --qos=high -J run-1"]).unwrap();
        assert_eq!(options.partition.as_deref(), Some("gpu"));
        assert_eq!(options.qos.as_deref(), Some("high"));
        assert_eq!(options.job_name.as_deref(), Some("run-1"));
    }

    #[test]
    fn later_option_wins() {
        let options = parse(&["-p a", "--partition=b"]).unwrap();
        assert_eq!(options.partition.as_deref(), Some("b"));
    }

    #[test]
    fn unknown_option() {
        let err = parse(&["--foo=1"]).unwrap_err();
        insta::assert_snapshot!(err, @"unknown scheduler option '--foo=1'");
        assert!(matches!(
            parse(&["normal"]),
            Err(ResolveError::UnknownSchedulerOption { .. })
        ));
    }

    #[test]
    fn invalid_values() {
        let err = parse(&["--nodes=abc"]).unwrap_err();
        insta::assert_snapshot!(err, @"invalid value for scheduler option '--nodes': `abc` is not a number: invalid digit found in string");
        assert!(matches!(
            parse(&["--nodes=0"]),
            Err(ResolveError::InvalidSchedulerOption { .. })
        ));
        assert!(matches!(
            parse(&["--mem=lots"]),
            Err(ResolveError::InvalidSchedulerOption { .. })
        ));
        assert!(matches!(
            parse(&["--exclusive=yes"]),
            Err(ResolveError::InvalidSchedulerOption { .. })
        ));
    }

    #[test]
    fn time_limit_too_large() {
        let err = parse(&["--time=999999999999999999"]).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidSchedulerOption { .. }));
        assert!(err.to_string().contains("is too large"));
    }

    #[test]
    fn missing_value() {
        let err = parse(&["--account"]).unwrap_err();
        insta::assert_snapshot!(err, @"invalid value for scheduler option '--account': missing value");
    }

    #[test]
    fn memory() {
        assert_eq!(parse(&["--mem=16g"]).unwrap().memory.as_deref(), Some("16G"));
        assert_eq!(parse(&["--mem=4000"]).unwrap().memory.as_deref(), Some("4000"));
    }

    #[test]
    fn slurm_time_formats() {
        let secs = |value: &str| parse_slurm_time(value).unwrap().as_secs();
        assert_eq!(secs("30"), 30 * 60);
        assert_eq!(secs("30:15"), 30 * 60 + 15);
        assert_eq!(secs("2:00:10"), 2 * 3600 + 10);
        assert_eq!(secs("1-2"), 86400 + 2 * 3600);
        assert_eq!(secs("1-2:30"), 86400 + 2 * 3600 + 30 * 60);
        assert_eq!(secs("1-02:30:05"), 86400 + 2 * 3600 + 30 * 60 + 5);
        assert!(parse_slurm_time("1:2:3:4").is_err());
        assert!(parse_slurm_time("x").is_err());
        assert!(parse_slurm_time("999999999999999999").is_err());
        assert!(parse_slurm_time("1-18446744073709551615:00:00").is_err());
        assert!(parse_slurm_time("213503982334602-00:00:00").is_err());
    }

    #[test]
    fn format_time() {
        assert_eq!(format_slurm_time(&Duration::from_secs(3902)), "01:05:02");
        assert_eq!(format_slurm_time(&Duration::from_secs(2 * 86400 + 60)), "2-00:01:00");
    }

    #[test]
    fn sbatch_directives() {
        let options = parse(&["-p normal", "--time=90", "--exclusive"]).unwrap();
        insta::assert_snapshot!(options.to_sbatch_directives(), @r"
        #SBATCH --partition=normal
        #SBATCH --time=01:30:00
        #SBATCH --exclusive
        ");
    }
}

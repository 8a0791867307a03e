use crate::Set;
use crate::resolve::error::{ARG_APP_LAYER, ARG_REQUEST_LAYER};
use crate::resolve::notes::{canonicalize_notes, notes_equivalent};
use crate::resolve::sanitize::find_dangerous_sequence;
use crate::resolve::{
    AppArgSpec, ArgKind, ArgSpec, InputMode, ResolveError, ResolveResult, concat_description,
};

/// Entry of the working list.
/// `origin` is the input mode of the application entry, `None` for request-only entries.
struct ScratchEntry {
    arg: ArgSpec,
    origin: Option<InputMode>,
}

/// Merges application arguments with request arguments into the resolved argument list.
///
/// The resolved list contains the included application arguments (in their original order),
/// updated by the request entries that reference them by name, followed by the request-only
/// entries (in their original order).
pub fn resolve_arg_specs(
    request: &[ArgSpec],
    app: &[AppArgSpec],
    kind: ArgKind,
) -> ResolveResult<Vec<ArgSpec>> {
    check_duplicate_names(app.iter().map(|entry| &entry.arg), kind, ARG_APP_LAYER)?;
    check_duplicate_names(request.iter(), kind, ARG_REQUEST_LAYER)?;

    let mut working: Vec<ScratchEntry> = app
        .iter()
        .filter(|entry| is_included(entry, find_named(request, entry.arg.name.as_deref())))
        .map(|entry| ScratchEntry {
            arg: ArgSpec {
                // Inclusion of application entries is decided by their mode
                include: None,
                ..entry.arg.clone()
            },
            origin: Some(entry.mode),
        })
        .collect();

    for entry in request {
        let position = entry.name.as_deref().and_then(|name| {
            working
                .iter()
                .position(|scratch| scratch.arg.name.as_deref() == Some(name))
        });
        match position {
            Some(index) => {
                let scratch = &mut working[index];
                if scratch.origin == Some(InputMode::Fixed) {
                    check_fixed_override(&scratch.arg, entry, kind)?;
                }
                merge_into(&mut scratch.arg, entry);
            }
            None => working.push(ScratchEntry {
                arg: entry.clone(),
                origin: None,
            }),
        }
    }

    scrub(working, kind)
}

fn check_duplicate_names<'a, I: Iterator<Item = &'a ArgSpec>>(
    args: I,
    kind: ArgKind,
    layer: &'static str,
) -> ResolveResult<()> {
    let mut names = Set::default();
    for name in args.filter_map(|arg| arg.name.as_deref()) {
        if !names.insert(name) {
            return Err(ResolveError::DuplicateName {
                kind,
                layer,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn find_named<'a>(request: &'a [ArgSpec], name: Option<&str>) -> Option<&'a ArgSpec> {
    let name = name?;
    request.iter().find(|arg| arg.name.as_deref() == Some(name))
}

/// Decides if an application entry becomes part of the working list.
fn is_included(entry: &AppArgSpec, request_entry: Option<&ArgSpec>) -> bool {
    match entry.mode {
        InputMode::Required | InputMode::Fixed => true,
        InputMode::IncludeByDefault => {
            !request_entry.is_some_and(|request| request.include == Some(false))
        }
        InputMode::IncludeOnDemand => {
            request_entry.is_some_and(|request| request.include != Some(false))
        }
    }
}

/// A FIXED entry can only receive an additional description.
fn check_fixed_override(original: &ArgSpec, entry: &ArgSpec, kind: ArgKind) -> ResolveResult<()> {
    let value_changed = entry.has_value() && entry.value != original.value;
    let notes_changed = entry.notes.is_some()
        && !notes_equivalent(original.notes.as_deref(), entry.notes.as_deref());
    if value_changed || notes_changed {
        return Err(ResolveError::FixedArgOverride {
            kind,
            name: original.display_name().to_string(),
            layer: ARG_REQUEST_LAYER,
            base_layer: ARG_APP_LAYER,
        });
    }
    Ok(())
}

/// Applies a named request entry to the application entry that it references.
fn merge_into(original: &mut ArgSpec, entry: &ArgSpec) {
    original.include = entry.include;
    if entry.has_value() {
        original.value.clone_from(&entry.value);
    }
    if entry.notes.is_some() {
        original.notes.clone_from(&entry.notes);
    }
    original.description =
        concat_description(original.description.as_deref(), entry.description.as_deref());
}

fn scrub(working: Vec<ScratchEntry>, kind: ArgKind) -> ResolveResult<Vec<ArgSpec>> {
    let mut resolved = Vec::with_capacity(working.len());
    for ScratchEntry { mut arg, origin } in working {
        if arg.include == Some(false) {
            match origin {
                None => {
                    log::debug!("Dropping excluded {kind} '{}'", arg.display_name());
                    continue;
                }
                Some(mode) => {
                    log::warn!(
                        "Ignoring exclusion of {mode} {kind} '{}', it is always included",
                        arg.display_name()
                    );
                }
            }
        }
        if !arg.has_value() {
            if origin == Some(InputMode::IncludeByDefault) {
                log::debug!(
                    "Dropping {kind} '{}' without a value, it is only included by default",
                    arg.display_name()
                );
                continue;
            }
            return Err(ResolveError::MissingValue {
                kind,
                name: arg.display_name().to_string(),
            });
        }
        check_dangerous(&arg, kind)?;
        let notes = canonicalize_notes(arg.notes.as_deref()).map_err(|reason| {
            ResolveError::InvalidNotes {
                name: arg.display_name().to_string(),
                reason,
            }
        })?;
        arg.notes = Some(notes);
        arg.include = None;
        resolved.push(arg);
    }
    Ok(resolved)
}

fn check_dangerous(arg: &ArgSpec, kind: ArgKind) -> ResolveResult<()> {
    let fields = [("name", arg.name.as_deref()), ("value", arg.value.as_deref())];
    for (field, text) in fields {
        if let Some(sequence) = text.and_then(find_dangerous_sequence) {
            return Err(ResolveError::DangerousCharacter {
                kind,
                name: arg.display_name().to_string(),
                field,
                sequence,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::resolve::{
        AppArgSpec, ArgKind, ArgSpec, InputMode, ResolveError, resolve_arg_specs,
    };

    fn app(mode: InputMode, name: &str, value: &str) -> AppArgSpec {
        AppArgSpec::new(mode, ArgSpec::named(name, value))
    }

    fn resolve(request: &[ArgSpec], app: &[AppArgSpec]) -> Result<Vec<ArgSpec>, ResolveError> {
        resolve_arg_specs(request, app, ArgKind::AppArgs)
    }

    fn values(args: &[ArgSpec]) -> Vec<&str> {
        args.iter().map(|arg| arg.value.as_deref().unwrap()).collect()
    }

    #[test]
    fn duplicate_app_names() {
        let err = resolve(
            &[],
            &[
                app(InputMode::Required, "input", "a"),
                app(InputMode::IncludeOnDemand, "input", "b"),
            ],
        )
        .unwrap_err();
        assert_eq!(err.message_id(), "duplicate named argument");
        insta::assert_snapshot!(err, @"application argument name 'input' is defined more than once in the application layer");
    }

    #[test]
    fn duplicate_request_names() {
        let err = resolve(
            &[ArgSpec::named("x", "1"), ArgSpec::named("x", "2")],
            &[],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::DuplicateName { layer: "job", .. }
        ));
    }

    #[test]
    fn anonymous_request_entries_can_repeat() {
        let resolved = resolve(&[ArgSpec::anonymous("-v"), ArgSpec::anonymous("-v")], &[]).unwrap();
        assert_eq!(values(&resolved), vec!["-v", "-v"]);
    }

    #[test]
    fn include_on_demand_truth_table() {
        let definition = [app(InputMode::IncludeOnDemand, "debug", "--debug")];

        assert!(resolve(&[], &definition).unwrap().is_empty());
        assert_eq!(
            values(&resolve(&[ArgSpec::reference("debug")], &definition).unwrap()),
            vec!["--debug"]
        );
        assert_eq!(
            values(
                &resolve(&[ArgSpec::reference("debug").with_include(true)], &definition).unwrap()
            ),
            vec!["--debug"]
        );
        assert!(
            resolve(&[ArgSpec::reference("debug").with_include(false)], &definition)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn include_by_default_truth_table() {
        let definition = [app(InputMode::IncludeByDefault, "threads", "-t 4")];

        assert_eq!(values(&resolve(&[], &definition).unwrap()), vec!["-t 4"]);
        assert_eq!(
            values(&resolve(&[ArgSpec::reference("threads")], &definition).unwrap()),
            vec!["-t 4"]
        );
        assert_eq!(
            values(
                &resolve(
                    &[ArgSpec::reference("threads").with_include(true)],
                    &definition
                )
                .unwrap()
            ),
            vec!["-t 4"]
        );
        assert!(
            resolve(
                &[ArgSpec::reference("threads").with_include(false)],
                &definition
            )
            .unwrap()
            .is_empty()
        );
    }

    #[test]
    fn request_value_replaces_app_value() {
        let resolved = resolve(
            &[ArgSpec::named("threads", "-t 16")],
            &[app(InputMode::IncludeByDefault, "threads", "-t 4")],
        )
        .unwrap();
        assert_eq!(values(&resolved), vec!["-t 16"]);
    }

    #[test]
    fn blank_request_value_keeps_app_value() {
        let resolved = resolve(
            &[ArgSpec::named("threads", "  ")],
            &[app(InputMode::Required, "threads", "-t 4")],
        )
        .unwrap();
        assert_eq!(values(&resolved), vec!["-t 4"]);
    }

    #[test]
    fn fixed_value_override_fails() {
        let err = resolve(
            &[ArgSpec::named("mode", "slow")],
            &[app(InputMode::Fixed, "mode", "fast")],
        )
        .unwrap_err();
        assert_eq!(err.message_id(), "fixed argument override");
        insta::assert_snapshot!(err, @"application argument 'mode' is FIXED in the application layer and cannot be changed by the job layer");
    }

    #[test]
    fn fixed_notes_override_fails() {
        let definition = [AppArgSpec::new(
            InputMode::Fixed,
            ArgSpec::named("mode", "fast").with_notes(r#"{"a":1}"#),
        )];
        assert!(matches!(
            resolve(
                &[ArgSpec::reference("mode").with_notes(r#"{"a":2}"#)],
                &definition
            ),
            Err(ResolveError::FixedArgOverride { .. })
        ));
        // Identical notes are not a change
        assert!(
            resolve(
                &[ArgSpec::reference("mode").with_notes(r#"{"a":1}"#)],
                &definition
            )
            .is_ok()
        );
    }

    #[test]
    fn fixed_empty_notes_are_equivalent() {
        let definition = [app(InputMode::Fixed, "mode", "fast")];
        let resolved = resolve(
            &[ArgSpec::named("mode", "fast").with_notes("{}")],
            &definition,
        )
        .unwrap();
        assert_eq!(values(&resolved), vec!["fast"]);
    }

    #[test]
    fn fixed_description_is_concatenated() {
        let definition = [AppArgSpec::new(
            InputMode::Fixed,
            ArgSpec::named("mode", "fast").with_description("Execution mode"),
        )];
        let resolved = resolve(
            &[ArgSpec::named("mode", "fast").with_description("Chosen by the operator")],
            &definition,
        )
        .unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(
            resolved[0].description.as_deref(),
            Some("Execution mode\n\nChosen by the operator")
        );
    }

    #[test]
    fn fixed_is_always_included() {
        let resolved = resolve(
            &[ArgSpec::reference("mode").with_include(false)],
            &[app(InputMode::Fixed, "mode", "fast")],
        )
        .unwrap();
        assert_eq!(values(&resolved), vec!["fast"]);
    }

    #[test]
    fn missing_required_value() {
        let err = resolve(
            &[],
            &[AppArgSpec::new(InputMode::Required, ArgSpec::reference("input"))],
        )
        .unwrap_err();
        assert_eq!(err.message_id(), "missing argument value");
        insta::assert_snapshot!(err, @"application argument 'input' has no value");
    }

    #[test]
    fn required_value_provided_by_request() {
        let resolved = resolve(
            &[ArgSpec::named("input", "data.csv")],
            &[AppArgSpec::new(InputMode::Required, ArgSpec::reference("input"))],
        )
        .unwrap();
        assert_eq!(values(&resolved), vec!["data.csv"]);
    }

    #[test]
    fn include_by_default_without_value_is_dropped() {
        let resolved = resolve(
            &[],
            &[AppArgSpec::new(
                InputMode::IncludeByDefault,
                ArgSpec::reference("optional"),
            )],
        )
        .unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn include_on_demand_without_value_fails() {
        let err = resolve(
            &[ArgSpec::reference("extra")],
            &[AppArgSpec::new(
                InputMode::IncludeOnDemand,
                ArgSpec::reference("extra"),
            )],
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::MissingValue { .. }));
    }

    #[test]
    fn anonymous_entry_without_value_fails() {
        let err = resolve(&[ArgSpec::default()], &[]).unwrap_err();
        insta::assert_snapshot!(err, @"application argument '<anonymous>' has no value");
    }

    #[test]
    fn order_is_app_then_request() {
        let resolved = resolve(
            &[
                ArgSpec::anonymous("req-1"),
                ArgSpec::named("b", "app-b-override"),
                ArgSpec::named("c", "req-c"),
                ArgSpec::anonymous("req-2"),
            ],
            &[
                app(InputMode::Required, "a", "app-a"),
                app(InputMode::IncludeByDefault, "b", "app-b"),
            ],
        )
        .unwrap();
        assert_eq!(
            values(&resolved),
            vec!["app-a", "app-b-override", "req-1", "req-c", "req-2"]
        );
    }

    #[test]
    fn excluded_request_only_entry_is_dropped() {
        let resolved = resolve(
            &[
                ArgSpec::named("unknown", "x").with_include(false),
                ArgSpec::anonymous("kept"),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(values(&resolved), vec!["kept"]);
    }

    #[test]
    fn dangerous_value() {
        let err = resolve(&[ArgSpec::named("cmd", "ls; rm -rf /")], &[]).unwrap_err();
        assert_eq!(err.message_id(), "dangerous argument character");
        insta::assert_snapshot!(err, @"application argument 'cmd' contains disallowed sequence ';' in its value");
    }

    #[test]
    fn dangerous_name() {
        let err = resolve_arg_specs(
            &[ArgSpec::named("a\nb", "x")],
            &[],
            ArgKind::ContainerArgs,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::DangerousCharacter {
                kind: ArgKind::ContainerArgs,
                field: "name",
                ..
            }
        ));
    }

    #[test]
    fn notes_are_canonicalized() {
        let resolved = resolve(
            &[
                ArgSpec::named("a", "1").with_notes(r#"{ "y": 2, "x": 1 }"#),
                ArgSpec::named("b", "2"),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(resolved[0].notes.as_deref(), Some(r#"{"x":1,"y":2}"#));
        assert_eq!(resolved[1].notes.as_deref(), Some("{}"));
    }

    #[test]
    fn invalid_notes() {
        let err = resolve(&[ArgSpec::named("a", "1").with_notes("[1]")], &[]).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidNotes { .. }));
    }

    #[test]
    fn request_notes_replace_app_notes() {
        let resolved = resolve(
            &[ArgSpec::reference("a").with_notes(r#"{"from":"job"}"#)],
            &[AppArgSpec::new(
                InputMode::IncludeByDefault,
                ArgSpec::named("a", "1").with_notes(r#"{"from":"app"}"#),
            )],
        )
        .unwrap();
        assert_eq!(resolved[0].notes.as_deref(), Some(r#"{"from":"job"}"#));
    }

    #[test]
    fn resolution_is_idempotent() {
        let resolved = resolve(
            &[
                ArgSpec::named("b", "2").with_description("job"),
                ArgSpec::anonymous("-x"),
            ],
            &[
                app(InputMode::Fixed, "a", "1"),
                app(InputMode::IncludeByDefault, "b", "0"),
                app(InputMode::IncludeOnDemand, "c", "3"),
            ],
        )
        .unwrap();
        let again = resolve(&resolved, &[]).unwrap();
        assert_eq!(resolved, again);
    }

    #[test]
    fn merge_in_place() {
        let config = crate::common::config::ResolverConfig::default();
        let resolver = crate::resolve::ParameterResolver::new(&config);
        let mut request = vec![ArgSpec::reference("debug")];
        resolver
            .merge_arg_spec_list(
                &mut request,
                &[app(InputMode::IncludeOnDemand, "debug", "--debug")],
                ArgKind::AppArgs,
            )
            .unwrap();
        assert_eq!(values(&request), vec!["--debug"]);
    }
}

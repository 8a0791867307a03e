//! Layered description of a job submission, as read by the command line interface.
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::config::ResolverConfig;
use crate::resolve::scheduler::SchedulerOptions;
use crate::resolve::{
    AppArgSpec, ArgKind, ArgSpec, EnvVar, EnvVarDefinition, ParameterResolver, ResolveResult,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemLayer {
    pub env: Vec<EnvVarDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppLayer {
    pub args: Vec<AppArgSpec>,
    pub container_args: Vec<AppArgSpec>,
    pub scheduler_options: Vec<AppArgSpec>,
    pub env: Vec<EnvVarDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestLayer {
    pub args: Vec<ArgSpec>,
    pub container_args: Vec<ArgSpec>,
    pub scheduler_options: Vec<ArgSpec>,
    pub env: Vec<EnvVar>,
}

/// Execution system defaults, application definition and the submission request of one job.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubmissionFile {
    pub system: SystemLayer,
    pub app: AppLayer,
    pub request: RequestLayer,
}

/// Final parameter set of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedParameters {
    pub app_args: Vec<ArgSpec>,
    pub container_args: Vec<ArgSpec>,
    pub scheduler_options: Vec<ArgSpec>,
    pub env: Vec<EnvVar>,
    pub scheduler: SchedulerOptions,
}

impl SubmissionFile {
    /// Loads a submission file, JSON if the file has a `.json` extension, TOML otherwise.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
        if is_json {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn resolve(&self, resolver: &ParameterResolver) -> ResolveResult<ResolvedParameters> {
        let mut app_args = self.request.args.clone();
        resolver.merge_arg_spec_list(&mut app_args, &self.app.args, ArgKind::AppArgs)?;

        let mut container_args = self.request.container_args.clone();
        resolver.merge_arg_spec_list(
            &mut container_args,
            &self.app.container_args,
            ArgKind::ContainerArgs,
        )?;

        let mut scheduler_options = self.request.scheduler_options.clone();
        resolver.merge_arg_spec_list(
            &mut scheduler_options,
            &self.app.scheduler_options,
            ArgKind::SchedulerOptions,
        )?;
        let scheduler = SchedulerOptions::from_args(&scheduler_options)?;

        let mut env = self.request.env.clone();
        resolver.merge_env_variables(&mut env, Some(&self.app.env), Some(&self.system.env))?;

        log::debug!(
            "Resolved {} application arguments, {} container arguments, {} scheduler options and {} environment variables",
            app_args.len(),
            container_args.len(),
            scheduler_options.len(),
            env.len()
        );
        Ok(ResolvedParameters {
            app_args,
            container_args,
            scheduler_options,
            env,
            scheduler,
        })
    }
}

/// Loads a submission file and resolves its parameters.
pub fn resolve_submission_file(
    path: &Path,
    config: &ResolverConfig,
) -> crate::Result<ResolvedParameters> {
    let submission = SubmissionFile::load(path)?;
    Ok(submission.resolve(&ParameterResolver::new(config))?)
}

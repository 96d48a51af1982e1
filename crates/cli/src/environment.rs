//! Environment snapshot of the measured build
//!
//! SCM and CI identity come from the variables well-known CI systems export;
//! the first variable present wins.

use std::collections::BTreeMap;

use contracts::{Info, KeyValue, Tool};

const SCM_ORIGIN: &[&str] = &["GIT_URL", "CI_REPOSITORY_URL", "GITHUB_REPOSITORY", "BUILD_REPOSITORY_URI"];
const SCM_CHANGE: &[&str] = &["GIT_COMMIT", "CI_COMMIT_SHA", "GITHUB_SHA", "BUILD_SOURCEVERSION"];
const SCM_BRANCH: &[&str] = &["GIT_BRANCH", "CI_COMMIT_REF_NAME", "GITHUB_REF_NAME", "BUILD_SOURCEBRANCHNAME"];

const CI_BUILD_NUMBER: &[&str] = &["BUILD_NUMBER", "CI_PIPELINE_IID", "GITHUB_RUN_NUMBER", "BUILD_BUILDNUMBER"];
const CI_JOB: &[&str] = &["JOB_NAME", "CI_JOB_NAME", "GITHUB_WORKFLOW", "BUILD_DEFINITIONNAME"];
const CI_HOST: &[&str] = &["NODE_NAME", "CI_RUNNER_DESCRIPTION", "RUNNER_NAME", "HOSTNAME", "COMPUTERNAME"];
const CI_USER: &[&str] = &["BUILD_USER", "GITLAB_USER_LOGIN", "GITHUB_ACTOR", "USER", "USERNAME"];

/// Snapshot of the current process environment
pub fn collect() -> Info {
    let mut info = from_vars(std::env::vars());
    let mut properties = vec![
        KeyValue::new("os.name", std::env::consts::OS),
        KeyValue::new("os.arch", std::env::consts::ARCH),
        KeyValue::new("os.family", std::env::consts::FAMILY),
    ];
    if let Ok(dir) = std::env::current_dir() {
        properties.push(KeyValue::new("user.dir", dir.display().to_string()));
    }
    properties.sort_by(|a, b| a.key.cmp(&b.key));
    info.system_properties = properties;
    info
}

/// Build an `Info` from an explicit set of variables
pub fn from_vars<I>(vars: I) -> Info
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: BTreeMap<String, String> = vars.into_iter().collect();
    Info {
        build: Tool::new("build-metrics").with_property("version", env!("CARGO_PKG_VERSION")),
        scm: detect_scm(&vars),
        ci: detect_ci(&vars),
        environment_variables: KeyValue::from_map(vars),
        system_properties: Vec::new(),
    }
}

fn first<'a>(vars: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| vars.get(*key))
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn detect_scm(vars: &BTreeMap<String, String>) -> Tool {
    let origin = first(vars, SCM_ORIGIN);
    let change = first(vars, SCM_CHANGE);
    if origin.is_none() && change.is_none() {
        return Tool::unknown();
    }

    let mut scm = Tool::new("git");
    for (key, value) in [
        ("origin", origin),
        ("change", change),
        ("branch", first(vars, SCM_BRANCH)),
    ] {
        if let Some(value) = value {
            scm = scm.with_property(key, value);
        }
    }
    scm
}

fn ci_kind(vars: &BTreeMap<String, String>) -> Option<&'static str> {
    let has = |key: &str| vars.contains_key(key);
    if has("JENKINS_URL") {
        Some("jenkins")
    } else if has("GITHUB_ACTIONS") {
        Some("github-actions")
    } else if has("GITLAB_CI") {
        Some("gitlab")
    } else if has("TF_BUILD") {
        Some("azure-pipelines")
    } else if has("CI") {
        Some("generic")
    } else {
        None
    }
}

fn detect_ci(vars: &BTreeMap<String, String>) -> Tool {
    let Some(kind) = ci_kind(vars) else {
        return Tool::unknown();
    };

    let mut ci = Tool::new(kind).with_property("os", std::env::consts::OS);
    for (key, keys) in [
        ("buildNumber", CI_BUILD_NUMBER),
        ("job", CI_JOB),
        ("host", CI_HOST),
        ("user", CI_USER),
    ] {
        if let Some(value) = first(vars, keys) {
            ci = ci.with_property(key, value);
        }
    }
    ci
}

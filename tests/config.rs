//! Configuration layering: files, then the command line.

use std::path::Path;

use clap::Parser;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use forklift::cli::Cli;
use forklift::config::{ConfigPaths, DEFAULT_FILE, Layer, LogLevel, PROJECT_FILE, RunConfig};
use forklift::drivers::DriverKind;
use forklift::error::ConfigError;
use forklift::services::{OverrideValue, ServiceRegistry};

struct Dirs {
    _root: TempDir,
    paths: ConfigPaths,
}

fn dirs() -> Dirs {
    let root = tempfile::tempdir().unwrap();
    let project = root.path().join("intranet");
    let user = root.path().join("config").join("forklift");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::create_dir_all(&user).unwrap();
    let paths = ConfigPaths {
        project_dir: project,
        user_config_dir: Some(user),
        cache_dir: root.path().join("cache"),
    };
    Dirs { _root: root, paths }
}

fn write(dir: &Path, name: &str, text: &str) {
    std::fs::write(dir.join(name), text).unwrap();
}

fn cli(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("forklift").chain(args.iter().copied())).unwrap()
}

fn resolve(dirs: &Dirs, cli: &Cli) -> Result<RunConfig, ConfigError> {
    let registry = ServiceRegistry::builtin();
    RunConfig::resolve(
        &dirs.paths,
        &registry,
        Layer::default(),
        cli.layer(&registry)?,
    )
}

#[test]
fn command_line_overrides_beat_every_file() {
    let dirs = dirs();
    let user = dirs.paths.user_config_dir.clone().unwrap();
    write(
        &dirs.paths.project_dir,
        PROJECT_FILE,
        "services:\n  - postgres\n  - elasticsearch\npostgres:\n  name: intranet\n  host: project-db\n",
    );
    write(&user, DEFAULT_FILE, "postgres:\n  user: me\n");

    let config = resolve(
        &dirs,
        &cli(&["--set", "postgres.host=cli-db", "--services", "redis", "./run.sh"]),
    )
    .unwrap();

    assert_eq!(config.services, vec!["redis".to_string()]);
    let postgres = &config.overrides["postgres"];
    assert_eq!(postgres["host"], OverrideValue::scalar("cli-db"));
    assert_eq!(postgres["name"], OverrideValue::scalar("intranet"));
    assert_eq!(postgres["user"], OverrideValue::scalar("me"));
}

#[test]
fn environment_from_files_and_command_line() {
    let dirs = dirs();
    write(
        &dirs.paths.project_dir,
        PROJECT_FILE,
        "environment:\n  - DEBUG=0\n  - SECRET_KEY=abc=\n",
    );

    let config = resolve(&dirs, &cli(&["-e", "DEBUG=1", "./run.sh"])).unwrap();
    assert_eq!(config.environment["DEBUG"], "1");
    assert_eq!(config.environment["SECRET_KEY"], "abc=");
}

#[test]
fn cleanroom_from_a_file() {
    let dirs = dirs();
    let user = dirs.paths.user_config_dir.clone().unwrap();
    write(&user, "intranet.yaml", "cleanroom: true\ndriver: docker\n");

    let config = resolve(&dirs, &cli(&["myorg/intranet"])).unwrap();
    assert!(config.application_id.starts_with("intranet-"));
    assert!(config.transient);
    assert!(config.rm);
    assert_eq!(config.driver, Some(DriverKind::Docker));
}

#[test]
fn docker_options() {
    let dirs = dirs();
    write(
        &dirs.paths.project_dir,
        PROJECT_FILE,
        "privileged: true\nstorage: /srv/intranet\ndocker_host_address: 10.0.0.1\n",
    );

    let config = resolve(&dirs, &cli(&["--interactive", "myorg/intranet"])).unwrap();
    assert!(config.docker.privileged);
    assert!(config.docker.interactive);
    assert!(!config.docker.rm);
    assert_eq!(
        config.docker.storage.as_deref(),
        Some(Path::new("/srv/intranet"))
    );
    assert_eq!(config.docker.host_address, "10.0.0.1");
}

#[test]
fn log_level_from_a_file() {
    let dirs = dirs();
    write(&dirs.paths.project_dir, PROJECT_FILE, "loglevel: debug\n");

    let config = resolve(&dirs, &cli(&["./run.sh"])).unwrap();
    assert_eq!(config.loglevel, LogLevel::Debug);

    write(&dirs.paths.project_dir, PROJECT_FILE, "loglevel: chatty\n");
    assert!(matches!(
        resolve(&dirs, &cli(&["./run.sh"])),
        Err(ConfigError::InvalidFile { .. })
    ));
}

#[test]
fn broken_file_names_the_file() {
    let dirs = dirs();
    write(&dirs.paths.project_dir, PROJECT_FILE, "serve_port: lots\n");

    match resolve(&dirs, &cli(&["./run.sh"])) {
        Err(ConfigError::InvalidFile { path, .. }) => {
            assert_eq!(path, dirs.paths.project_dir.join(PROJECT_FILE));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn no_user_config_dir_still_reads_the_project_file() {
    let mut dirs = dirs();
    dirs.paths.user_config_dir = None;
    write(&dirs.paths.project_dir, PROJECT_FILE, "application_id: portal\n");

    let config = resolve(&dirs, &cli(&["./run.sh"])).unwrap();
    assert_eq!(config.application_id, "portal");
}

//! Binary entry point for the `incus-machine` CLI.

mod cli;

use std::fmt::Display;
use std::io::{self, Write};
use std::net::IpAddr;
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use incus_machine::{
    ConfigError, DRIVER_NAME, IncusConfig, IncusDriver, IncusDriverError, MachineDriver,
    MachineRecord, MachineStore, StoreError,
};

use cli::{Cli, Command};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("machine store error: {0}")]
    Store(#[from] StoreError),
    #[error("driver error: {0}")]
    Driver(#[from] IncusDriverError),
    #[error("machine {0} already exists")]
    Exists(String),
    #[error("machine {name} is managed by the `{driver}` driver")]
    ForeignDriver { name: String, driver: String },
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = IncusConfig::load_without_cli_args()?;
    let store = MachineStore::new(store_root(cli.store_path.as_deref(), &config));
    let mut out = io::stdout();

    match cli.command {
        Command::Create(args) => {
            let address = create(&config, &store, &args.name).await?;
            emit(&mut out, address)
        }
        Command::Start(args) => Ok(load_driver(&store, &args.name)?.start().await?),
        Command::Stop(args) => Ok(load_driver(&store, &args.name)?.stop().await?),
        Command::Restart(args) => Ok(load_driver(&store, &args.name)?.restart().await?),
        Command::Kill(args) => Ok(load_driver(&store, &args.name)?.kill().await?),
        Command::Rm(args) => remove(&store, &args.name, args.force).await,
        Command::Status(args) => {
            let state = load_driver(&store, &args.name)?.state().await?;
            emit(&mut out, state)
        }
        Command::Url(args) => {
            let url = load_driver(&store, &args.name)?.url().await?;
            emit(&mut out, url)
        }
        Command::Ip(args) => {
            let address = load_driver(&store, &args.name)?.ip()?;
            emit(&mut out, address)
        }
        Command::SshInfo(args) => {
            let driver = load_driver(&store, &args.name)?;
            let info = render_ssh_info(
                driver.ssh_hostname()?,
                driver.ssh_port(),
                &driver.ssh_username(),
                driver.ssh_key_path(),
            );
            out.write_all(info.as_bytes())
                .map_err(|err| CliError::Output(err.to_string()))
        }
        Command::Upgrade(args) => Ok(load_driver(&store, &args.name)?.upgrade().await?),
    }
}

fn store_root<'a>(flag: Option<&'a str>, config: &'a IncusConfig) -> &'a str {
    flag.unwrap_or(&config.store_path)
}

async fn create(
    config: &IncusConfig,
    store: &MachineStore,
    name: &str,
) -> Result<IpAddr, CliError> {
    match store.load(name) {
        Ok(_) => return Err(CliError::Exists(name.to_owned())),
        Err(StoreError::Missing { .. }) => {}
        Err(err) => return Err(err.into()),
    }

    let settings = config.settings()?;
    let mut driver = IncusDriver::new(name, store.ssh_key_path(name)?, settings.clone());
    driver.pre_create_check().await?;

    let mut record = MachineRecord {
        name: name.to_owned(),
        driver: driver.driver_name().to_owned(),
        settings,
        ip_address: None,
    };
    // `rm` needs this record even when creation fails.
    store.save(&record)?;

    let address = driver.create().await?;
    record.ip_address = Some(address);
    store.save(&record)?;
    Ok(address)
}

async fn remove(store: &MachineStore, name: &str, force: bool) -> Result<(), CliError> {
    match remove_instance(store, name).await {
        Ok(()) => {}
        Err(CliError::Driver(err)) if force => {
            warn!(machine = %name, error = %err, "instance removal failed; removing local state");
        }
        Err(err) => return Err(err),
    }
    store.remove(name)?;
    info!(machine = %name, "machine removed");
    Ok(())
}

async fn remove_instance(store: &MachineStore, name: &str) -> Result<(), CliError> {
    load_driver(store, name)?.remove().await?;
    Ok(())
}

fn load_driver(store: &MachineStore, name: &str) -> Result<IncusDriver, CliError> {
    let record = store.load(name)?;
    if record.driver != DRIVER_NAME {
        return Err(CliError::ForeignDriver {
            name: record.name,
            driver: record.driver,
        });
    }
    Ok(
        IncusDriver::new(name, store.ssh_key_path(name)?, record.settings)
            .with_ip_address(record.ip_address),
    )
}

fn render_ssh_info(host: IpAddr, port: u16, user: &str, key_path: &Utf8Path) -> String {
    format!("Hostname: {host}\nPort: {port}\nUser: {user}\nIdentityFile: {key_path}\n")
}

fn emit(out: &mut impl Write, value: impl Display) -> Result<(), CliError> {
    writeln!(out, "{value}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use rstest::rstest;

    fn config_with_store(store_path: &str) -> IncusConfig {
        IncusConfig {
            url: String::new(),
            tls_client_cert: String::new(),
            tls_client_key: String::new(),
            cpu_count: 1,
            memory_size: 1024,
            disk_size: 10240,
            project: String::from("default"),
            profile: String::from("default"),
            network_name: String::from("incusbr0"),
            storage_name: String::from("local"),
            image_name: String::new(),
            cloudinit_userdata: None,
            ssh_port: 22,
            ssh_user: String::from("root"),
            store_path: store_path.to_owned(),
            ip_poll_interval_secs: 5,
            ip_poll_attempts: 100,
        }
    }

    #[rstest]
    #[case(Some("/srv/machines"), "/srv/machines")]
    #[case(None, "~/.incus-machine")]
    fn store_flag_overrides_configuration(#[case] flag: Option<&str>, #[case] expected: &str) {
        let config = config_with_store("~/.incus-machine");
        assert_eq!(store_root(flag, &config), expected);
    }

    #[test]
    fn ssh_info_lists_connection_details() {
        let key = Utf8PathBuf::from("/store/machines/vm1/id_rsa");
        let rendered = render_ssh_info(IpAddr::from([10, 0, 0, 5]), 22, "root", &key);
        assert_eq!(
            rendered,
            "Hostname: 10.0.0.5\nPort: 22\nUser: root\nIdentityFile: /store/machines/vm1/id_rsa\n"
        );
    }

    #[test]
    fn emit_appends_a_newline() {
        let mut buf = Vec::new();
        emit(&mut buf, "Running").unwrap_or_else(|err| panic!("emit: {err}"));
        assert_eq!(buf, b"Running\n");
    }

    #[test]
    fn load_driver_rejects_foreign_records() {
        let tmp = tempfile::TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = tmp
            .path()
            .to_str()
            .unwrap_or_else(|| panic!("temp dir should be utf8"));
        let store = MachineStore::new(root);
        store
            .save(&MachineRecord {
                name: String::from("vm1"),
                driver: String::from("virtualbox"),
                settings: incus_machine::DriverSettings::default(),
                ip_address: None,
            })
            .unwrap_or_else(|err| panic!("save: {err}"));

        let result = load_driver(&store, "vm1");
        assert!(
            matches!(result, Err(CliError::ForeignDriver { ref driver, .. }) if driver == "virtualbox"),
            "unexpected result: {:?}",
            result.err()
        );
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let error = CliError::Exists(String::from("vm1"));
        write_error(&mut buf, &error);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(
            rendered.contains("machine vm1 already exists"),
            "rendered: {rendered}"
        );
    }
}

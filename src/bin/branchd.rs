// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{collections::BTreeMap, env, fs, path::Path, str::FromStr};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use env_logger::Builder;
use log::LevelFilter;

use branchd::{
    branch::{
        run_monitor, BranchError, BranchResult, Config, ErrorKind, DEFAULT_CONFIG_PATH, VERSION,
    },
    engine::{new_manager, ThinCloneManager},
    retrieval::extract_control_data_params,
};

fn parse_args() -> Command {
    Command::new("branchd")
        .version(VERSION)
        .about("Database thin-clone provisioning and disk usage accounting")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .default_value(DEFAULT_CONFIG_PATH)
                .help("Path of the configuration file"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Sets level for generation of log messages"),
        )
        .subcommands(vec![
            Command::new("snapshot")
                .about("Manage snapshots of the base volume")
                .subcommands(vec![
                    Command::new("create")
                        .arg(
                            Arg::new("source")
                                .long("source")
                                .value_name("CLONE")
                                .help("Snapshot the named clone instead of the base volume"),
                        )
                        .arg(Arg::new("name").required(true)),
                    Command::new("destroy")
                        .arg(
                            Arg::new("force")
                                .long("force")
                                .action(ArgAction::SetTrue)
                                .help("Destroy dependent clones along with the snapshot"),
                        )
                        .arg(Arg::new("id").required(true)),
                    Command::new("list"),
                    Command::new("cleanup").arg(
                        Arg::new("keep")
                            .value_parser(value_parser!(usize))
                            .help("Number of newest snapshots to keep"),
                    ),
                ]),
            Command::new("clone")
                .about("Manage writable clones")
                .subcommands(vec![
                    Command::new("create")
                        .arg(Arg::new("name").required(true))
                        .arg(Arg::new("snapshot").required(true)),
                    Command::new("destroy").arg(Arg::new("name").required(true)),
                    Command::new("list"),
                ]),
            Command::new("state")
                .about("Report clone and pool state")
                .subcommands(vec![
                    Command::new("session").arg(Arg::new("name").required(true)),
                    Command::new("disk"),
                ]),
            Command::new("monitor")
                .about("Account the disk transfer of one process")
                .arg(
                    Arg::new("pid")
                        .required(true)
                        .value_parser(value_parser!(i32)),
                ),
            Command::new("restore").about("Print the restore command for the configured dump"),
            Command::new("sync")
                .about("Helpers for synchronizing a physical copy")
                .subcommand_required(true)
                .subcommands(vec![Command::new("params")
                    .about("Extract instance settings from saved control data")
                    .arg(Arg::new("file").required(true))]),
        ])
}

fn initialize_log(log_level: Option<&str>) {
    let mut builder = Builder::new();
    if let Some(log_level) = log_level {
        builder.filter(
            Some("branchd"),
            LevelFilter::from_str(log_level)
                .expect("argument parser only accepts valid level names"),
        );
    } else if let Ok(s) = env::var("RUST_LOG") {
        builder.parse_filters(&s);
    }
    builder.init();
}

fn load_manager(config: &Config) -> BranchResult<Box<dyn ThinCloneManager>> {
    new_manager(
        config.provision.mode,
        &config.provision.pool,
        &config.provision.clones_mount_dir,
    )
}

fn dispatch(args: &ArgMatches) -> BranchResult<()> {
    let config_path = args.get_one::<String>("config").expect("has a default");
    let config = Config::from_file(Path::new(config_path.as_str()))?;
    if let Some(subcommand) = args.subcommand_matches("snapshot") {
        let manager = load_manager(&config)?;
        if let Some(args) = subcommand.subcommand_matches("create") {
            let id = manager.create_snapshot(
                args.get_one::<String>("source").map(|s| s.as_str()),
                args.get_one::<String>("name").expect("required"),
            )?;
            println!("{}", id);
            Ok(())
        } else if let Some(args) = subcommand.subcommand_matches("destroy") {
            manager.destroy_snapshot(
                args.get_one::<String>("id").expect("required"),
                args.get_flag("force"),
            )
        } else if let Some(args) = subcommand.subcommand_matches("cleanup") {
            let keep = args
                .get_one::<usize>("keep")
                .copied()
                .unwrap_or(config.provision.snapshot_retention);
            let cleanup = manager.cleanup_snapshots(keep)?;
            for id in &cleanup.destroyed {
                println!("{}", id);
            }
            for (id, err) in &cleanup.failed {
                eprintln!("not destroyed {}: {}", id, err);
            }
            if cleanup.failed.is_empty() {
                Ok(())
            } else {
                Err(BranchError::Engine(
                    ErrorKind::Backend,
                    format!("{} snapshots could not be destroyed", cleanup.failed.len()),
                ))
            }
        } else {
            for snapshot in manager.get_snapshots()? {
                println!("{}\t{}", snapshot.id, snapshot.created_at.to_rfc3339());
            }
            Ok(())
        }
    } else if let Some(subcommand) = args.subcommand_matches("clone") {
        let manager = load_manager(&config)?;
        if let Some(args) = subcommand.subcommand_matches("create") {
            manager.create_clone(
                args.get_one::<String>("name").expect("required"),
                args.get_one::<String>("snapshot").expect("required"),
            )
        } else if let Some(args) = subcommand.subcommand_matches("destroy") {
            manager.destroy_clone(args.get_one::<String>("name").expect("required"))
        } else {
            for name in manager.list_clones()? {
                println!("{}", name);
            }
            Ok(())
        }
    } else if let Some(subcommand) = args.subcommand_matches("state") {
        let manager = load_manager(&config)?;
        if let Some(args) = subcommand.subcommand_matches("session") {
            let state =
                manager.get_session_state(args.get_one::<String>("name").expect("required"))?;
            println!("clone_diff_size\t{}", state.clone_diff_size);
            Ok(())
        } else {
            let disk = manager.get_disk_state()?;
            println!("size\t{}", disk.size);
            println!("used\t{}", disk.used);
            println!("free\t{}", disk.free);
            Ok(())
        }
    } else if let Some(args) = args.subcommand_matches("monitor") {
        let pid = *args.get_one::<i32>("pid").expect("required");
        let total = run_monitor(&config.monitor, pid)?;
        println!("{}", total);
        Ok(())
    } else if args.subcommand_matches("restore").is_some() {
        let restore = config.restore.ok_or_else(|| {
            BranchError::Engine(
                ErrorKind::Config,
                "no restore section in the configuration".to_owned(),
            )
        })?;
        println!("{}", restore.restore_command().join(" "));
        Ok(())
    } else if let Some(subcommand) = args.subcommand_matches("sync") {
        if let Some(args) = subcommand.subcommand_matches("params") {
            let data = fs::read_to_string(args.get_one::<String>("file").expect("required"))?;
            let params = extract_control_data_params(&data)
                .into_iter()
                .collect::<BTreeMap<String, String>>();
            println!("{}", serde_json::to_string_pretty(&params)?);
        }
        Ok(())
    } else {
        unreachable!("the parser requires a subcommand")
    }
}

fn main() -> Result<(), String> {
    let matches = parse_args().get_matches();
    initialize_log(matches.get_one::<String>("log-level").map(|s| s.as_str()));
    dispatch(&matches).map_err(|e| e.to_string())
}

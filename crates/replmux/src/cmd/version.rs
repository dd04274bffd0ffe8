use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct BuildInfo {
    name: &'static str,
    version: &'static str,
    target: &'static str,
    os: &'static str,
    arch: &'static str,
    features: Vec<&'static str>,
}

impl BuildInfo {
    fn current() -> Self {
        let mut features = vec!["cli"];
        if cfg!(feature = "session") {
            features.push("session");
        }
        if cfg!(feature = "async") {
            features.push("async");
        }
        Self {
            name: "replmux",
            version: env!("CARGO_PKG_VERSION"),
            target: option_env!("REPLMUX_BUILD_TARGET").unwrap_or("unknown"),
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            features,
        }
    }
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let info = BuildInfo::current();

    if format == OutputFormat::Json {
        print_json(&info);
    } else if args.extended {
        println!("name: {}", info.name);
        println!("version: {}", info.version);
        println!("target: {}", info.target);
        println!("os: {}", info.os);
        println!("arch: {}", info.arch);
        println!("features: {}", info.features.join(","));
    } else {
        println!("{} {}", info.name, info.version);
    }

    Ok(SUCCESS)
}

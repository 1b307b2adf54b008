//! Deploy Gate - 部署生命周期网关
//!
//! Usage:
//! - Normal mode: `deploy-gate`
//! - With custom port: `deploy-gate --port 9000`
//! - Local mode (no token validation, store via kubectl proxy): `deploy-gate --local`

use deploy_gate::RuntimeConfig;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            "--local" => {
                config.local = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("Deploy Gate - 部署生命周期网关");
    println!();
    println!("USAGE:");
    println!("    deploy-gate [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port");
    println!("    --local          Run locally (skips OIDC validation unless TESTING_ENABLE_OIDC is set)");
    println!("    -h, --help       Print help information");
    println!();
    println!("EXAMPLES:");
    println!("    deploy-gate                   # In-cluster mode");
    println!("    deploy-gate --local           # Local mode against kubectl proxy");
}

fn main() {
    let config = parse_args();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(deploy_gate::run(config)) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

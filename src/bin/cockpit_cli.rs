//! CLI client for the `cockpitd` daemon.
//!
//! Examples:
//!   cockpit-cli status
//!   cockpit-cli galaxies --search support --health poor
//!   cockpit-cli leaderboard agent-1 prompt-a
//!   cockpit-cli optimize start agent-1 prompt-a
//!   cockpit-cli deploy agent-1 prompt-a trace-42
//!
//! By default it talks to 127.0.0.1:9877; override with `--addr host:port`.

use cockpit::model::{MetricMapping, Variant};
use cockpit::protocol::{PlanetDetail, Request, Response, StateSnapshot};
use cockpit::view::{GalaxyView, HealthFilter};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process;
use std::time::Duration;

fn usage() -> ! {
    eprintln!("cockpit-cli (talks to cockpitd @ 127.0.0.1:9877 by default)");
    eprintln!("Usage: cockpit-cli [--addr host:port] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  status                                   Feed status and universe summary");
    eprintln!("  galaxies [--search s] [--health h]       Filtered galaxy list (h: all|good|medium|poor)");
    eprintln!("  leaderboard <galaxy> <planet>            Top-ranked variants");
    eprintln!("  planet <galaxy> <planet>                 Planet detail, health and scalars");
    eprintln!("  highlights <galaxy> <planet>             Active new-entry / new-leader flags");
    eprintln!("  locate <trace>                           Find the planet owning a trace");
    eprintln!("  move <galaxy> <x> <y> <z>                Place a galaxy");
    eprintln!("  toggle <galaxy> <planet>                 Switch planet active/inactive");
    eprintln!("  mapping <galaxy> <property=metric>...    Set metric mapping (empty metric unmaps)");
    eprintln!("  optimize <start|stop> <galaxy> <planet>  Control the optimizer");
    eprintln!("  optimizer <galaxy> <planet> <name> [threshold]");
    eprintln!("  deploy <galaxy> <planet> <variant>       Deploy a variant");
    eprintln!("  add-trace <galaxy> <planet> <id> <score> [text]");
    eprintln!("  delete <galaxy>                          Delete a galaxy");
    eprintln!("  shutdown                                 Stop the daemon");
    eprintln!("  paths                                    Show the config file path");
    process::exit(1);
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let mut addr = "127.0.0.1:9877".to_string();
    if args.len() >= 2 && args[0] == "--addr" {
        addr = args[1].clone();
        args.drain(0..2);
    }

    if args.is_empty() {
        usage();
    }

    (addr, args)
}

fn send_request(addr: &str, req: &Request) -> Result<Response, String> {
    let mut stream = TcpStream::connect(addr).map_err(|e| format!("connect: {e}"))?;
    stream
        .set_read_timeout(Some(Duration::from_secs(15)))
        .map_err(|e| format!("set_read_timeout: {e}"))?;
    let mut reader = BufReader::new(stream.try_clone().map_err(|e| format!("clone: {e}"))?);

    let line = serde_json::to_string(req).map_err(|e| format!("serialize: {e}"))?;
    stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.write_all(b"\n"))
        .map_err(|e| format!("send: {e}"))?;

    let mut resp_line = String::new();
    reader
        .read_line(&mut resp_line)
        .map_err(|e| format!("recv: {e}"))?;
    serde_json::from_str(&resp_line).map_err(|e| format!("parse response: {e}"))
}

fn fail(msg: &str) -> ! {
    eprintln!("{}", msg);
    process::exit(1);
}

fn arg(args: &[String], i: usize) -> String {
    match args.get(i) {
        Some(a) => a.clone(),
        None => usage(),
    }
}

fn number(args: &[String], i: usize, what: &str) -> f64 {
    arg(args, i)
        .parse()
        .unwrap_or_else(|_| fail(&format!("{what} must be a number")))
}

fn print_state(s: &StateSnapshot) {
    println!("feed={} status={:?}", s.feed, s.status);
    println!(
        "galaxies={} optimizing=[{}]",
        s.universe.len(),
        s.optimizing.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    for g in s.universe.sorted() {
        println!(
            "  {:<16} {:<24} status={:<10} planets={}",
            g.id,
            g.name,
            g.status.as_str(),
            g.planets.len()
        );
    }
}

fn print_galaxies(galaxies: &[GalaxyView]) {
    for g in galaxies {
        println!("{} ({}) status={}", g.id, g.name, g.status.as_str());
        for p in &g.planets {
            let score = p
                .deployed_version
                .as_ref()
                .and_then(Variant::raw_score)
                .map(|s| format!("{s:.2}"))
                .unwrap_or_else(|| "-".to_string());
            println!("  {:<16} {:<24} {:<9} deployed={}", p.id, p.name, p.status.as_str(), score);
        }
    }
}

fn print_planet(d: &PlanetDetail) {
    let p = &d.planet;
    println!("{}/{} ({}) status={}", d.galaxy_id, p.id, p.name, p.status.as_str());
    match &p.deployed_version {
        Some(v) => println!("deployed: {} score={:.3}", v.id, v.score()),
        None => println!("deployed: none"),
    }
    println!(
        "health={} traces={} optimizing={} optimizer={:?} threshold={:.2}",
        d.health
            .map(|h| format!("{h:?}").to_lowercase())
            .unwrap_or_else(|| "unknown".to_string()),
        p.trace_history.len(),
        d.optimizing,
        d.optimizer,
        d.score_threshold,
    );
    println!(
        "scalars: orbit={:.2} size={:.2} speed={:.2} critical={}",
        d.scalars.orbit_radius, d.scalars.size, d.scalars.orbital_speed, d.scalars.critical
    );
}

fn main() {
    let (addr, args) = parse_args();
    let cmd = &args[0];

    let req = match cmd.as_str() {
        "status" => Request::GetState,
        "galaxies" => {
            let mut search = String::new();
            let mut health = HealthFilter::All;
            let mut i = 1;
            while i < args.len() {
                match args[i].as_str() {
                    "--search" => search = arg(&args, i + 1),
                    "--health" => {
                        health = serde_json::from_value(serde_json::Value::String(arg(&args, i + 1)))
                            .unwrap_or_else(|_| fail("health must be all|good|medium|poor"))
                    }
                    _ => usage(),
                }
                i += 2;
            }
            Request::Filter { search, health }
        }
        "leaderboard" => Request::GetLeaderboard {
            galaxy_id: arg(&args, 1),
            planet_id: arg(&args, 2),
        },
        "planet" => Request::GetPlanet {
            galaxy_id: arg(&args, 1),
            planet_id: arg(&args, 2),
        },
        "highlights" => Request::GetHighlights {
            galaxy_id: arg(&args, 1),
            planet_id: arg(&args, 2),
        },
        "locate" => Request::LocateTrace {
            trace_id: arg(&args, 1),
        },
        "move" => Request::MoveGalaxy {
            galaxy_id: arg(&args, 1),
            position: [
                number(&args, 2, "x"),
                number(&args, 3, "y"),
                number(&args, 4, "z"),
            ],
        },
        "toggle" => Request::TogglePlanetStatus {
            galaxy_id: arg(&args, 1),
            planet_id: arg(&args, 2),
        },
        "mapping" => {
            let galaxy_id = arg(&args, 1);
            let mut mapping = MetricMapping::new();
            for pair in &args[2..] {
                let Some((property, metric)) = pair.split_once('=') else {
                    fail("mapping entries look like planetSize=score");
                };
                mapping.insert(property.to_string(), metric.to_string());
            }
            Request::SetMetricMapping { galaxy_id, mapping }
        }
        "optimize" => {
            let galaxy_id = arg(&args, 2);
            let planet_id = arg(&args, 3);
            match arg(&args, 1).as_str() {
                "start" => Request::StartOptimization {
                    galaxy_id,
                    planet_id,
                },
                "stop" => Request::StopOptimization {
                    galaxy_id,
                    planet_id,
                },
                _ => fail("optimize takes start|stop"),
            }
        }
        "optimizer" => Request::SetOptimizer {
            galaxy_id: arg(&args, 1),
            planet_id: arg(&args, 2),
            optimizer: Some(arg(&args, 3)),
            score_threshold: if args.len() > 4 {
                Some(number(&args, 4, "threshold"))
            } else {
                None
            },
        },
        "deploy" => Request::DeployVariant {
            galaxy_id: arg(&args, 1),
            planet_id: arg(&args, 2),
            variant_id: arg(&args, 3),
        },
        "add-trace" => {
            let mut variant = Variant::scored(arg(&args, 3), number(&args, 4, "score"));
            if args.len() > 5 {
                variant.text = args[5..].join(" ");
            }
            Request::AddTrace {
                galaxy_id: arg(&args, 1),
                planet_id: arg(&args, 2),
                variant,
            }
        }
        "delete" => Request::DeleteGalaxy {
            galaxy_id: arg(&args, 1),
        },
        "shutdown" => Request::Shutdown,
        "paths" => {
            // Special command: doesn't need daemon, just print paths
            #[cfg(unix)]
            {
                if let Ok(home) = std::env::var("HOME") {
                    println!("Config file: {}/.local/share/cockpit/config.json", home);
                }
            }
            #[cfg(windows)]
            {
                if let Ok(appdata) = std::env::var("APPDATA") {
                    println!("Config file: {}\\cockpit\\config.json", appdata);
                }
            }
            process::exit(0);
        }
        _ => usage(),
    };

    match send_request(&addr, &req) {
        Ok(Response::State(s)) => print_state(&s),
        Ok(Response::Leaderboard { entries, .. }) => {
            for e in entries {
                let marker = if e.is_deployed { "*" } else { " " };
                println!("{:>3}{} {:<24} {:.3}", e.rank, marker, e.variant.id, e.variant.score());
            }
        }
        Ok(Response::Planet(d)) => print_planet(&d),
        Ok(Response::Highlights { highlights, .. }) => {
            for h in highlights {
                let entry = if h.new_entry { " +new" } else { "" };
                println!(
                    "{:<24} {:?}{} intensity={:.2}",
                    h.variant_id, h.kind, entry, h.intensity
                );
            }
        }
        Ok(Response::Galaxies { galaxies }) => print_galaxies(&galaxies),
        Ok(Response::TraceLocation {
            trace_id,
            location,
            rank,
        }) => match location {
            Some(key) => println!(
                "{trace_id}: {}/{} rank={}",
                key.galaxy_id,
                key.planet_id,
                rank.map(|r| r.to_string()).unwrap_or_else(|| "deployed".to_string())
            ),
            None => println!("{trace_id}: not found"),
        },
        Ok(Response::Success { message }) => println!("{message}"),
        Ok(Response::Error { message }) => {
            eprintln!("Error: {message}");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed: {e}");
            process::exit(1);
        }
    }
}

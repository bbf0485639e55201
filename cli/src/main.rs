use clap::{Parser, Subcommand};
use drt_common::db::core::Design;
use drt_common::util::config::Config;
use drt_common::util::generator::{self, GeneratorParams};
use drt_common::util::{check, logger};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Route,
    Generate {
        #[arg(long, default_value_t = 200)]
        nets: usize,
        /// Tracks per side of the die.
        #[arg(long, default_value_t = 120)]
        size: usize,
        #[arg(long, default_value_t = 4)]
        layers: usize,
        #[arg(long, default_value_t = 10)]
        obstructions: usize,
        #[arg(long, default_value = "inputs/design.toml")]
        output: String,
    },
}

fn main() -> anyhow::Result<()> {
    logger::init();
    let args = Args::parse();
    let config = load_config(&args.config)?;

    match args.command.unwrap_or(Commands::Route) {
        Commands::Generate {
            nets,
            size,
            layers,
            obstructions,
            output,
        } => {
            prepare_output_dir(&output)?;
            let design = generator::generate_random_design(&GeneratorParams {
                nets,
                tracks: size,
                layers,
                obstructions,
            });
            save_design(&design, &output)?;
            log::info!("Generated: {}", output);
        }
        Commands::Route => {
            if !Path::new(&config.input.design_file).exists() {
                return Err(anyhow::anyhow!(
                    "Input design file missing: '{}'. Did you run 'generate'?",
                    config.input.design_file
                ));
            }
            if !run_routing(&config)? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        log::info!("Loading configuration from {:?}", path);
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        toml::from_str(&config_str).map_err(|e| anyhow::anyhow!("Failed to parse config TOML: {}", e))
    } else {
        log::warn!("Configuration file {:?} not found. Using internal defaults.", path);
        Ok(Config::default())
    }
}

fn prepare_output_dir(path_str: &str) -> anyhow::Result<()> {
    if let Some(parent) = Path::new(path_str).parent()
        && !parent.exists()
        && !parent.as_os_str().is_empty()
    {
        log::info!("Creating output directory: {:?}", parent);
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn load_design(path: &str) -> anyhow::Result<Design> {
    log::info!("Reading design: {}", path);
    let text = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("Failed to read '{}': {}", path, e))?;
    let design: Design = toml::from_str(&text).map_err(|e| anyhow::anyhow!("Invalid design TOML in '{}': {}", path, e))?;
    design.validate().map_err(|e| anyhow::anyhow!("Invalid design '{}': {}", path, e))?;
    Ok(design)
}

fn save_design(design: &Design, path: &str) -> anyhow::Result<()> {
    let text = toml::to_string(design).map_err(|e| anyhow::anyhow!("Failed to encode design: {}", e))?;
    std::fs::write(path, text)?;
    Ok(())
}

/// Routes the configured design and writes the routed design, the net
/// listing and the marker report. Returns whether the result is clean.
fn run_routing(config: &Config) -> anyhow::Result<bool> {
    let mut design = load_design(&config.input.design_file)?;
    log::info!(
        "Design '{}': {} nets, {} layers, {} obstructions",
        design.name,
        design.nets.len(),
        design.tech.num_layers(),
        design.obstructions.len()
    );

    let summary = drt_router::route(&mut design, config).map_err(|e| anyhow::anyhow!(e))?;
    log::info!(
        "Routing finished after {} iterations: {} markers, {} unrouted nets",
        summary.iterations,
        summary.markers,
        summary.unrouted
    );

    let verdict = check::run(&design);

    prepare_output_dir(&config.input.report_file)?;
    std::fs::write(&config.input.report_file, check::marker_report(&design))?;
    log::info!("Wrote marker report to {}", config.input.report_file);

    prepare_output_dir(&config.input.output_file)?;
    save_design(&design, &config.input.output_file)?;
    let listing = Path::new(&config.input.output_file).with_extension("def");
    log::info!("Writing routed nets to {:?}", listing);
    save_routed_nets(&design, &listing)?;

    if let Err(e) = verdict {
        log::error!("Verification Failed: {}", e);
        return Ok(false);
    }
    Ok(true)
}

fn save_routed_nets(design: &Design, path: &Path) -> std::io::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    let dbu = design.tech.dbu_per_micron;
    writeln!(file, "VERSION 5.8 ;")?;
    writeln!(file, "DESIGN {} ;", design.name)?;
    writeln!(file, "UNITS DISTANCE MICRONS {} ;", dbu)?;
    let die = design.die_area;
    writeln!(
        file,
        "DIEAREA ( {} {} ) ( {} {} ) ;",
        die.min.x, die.min.y, die.max.x, die.max.y
    )?;

    writeln!(file, "NETS {} ;", design.nets.len())?;
    for net in &design.nets {
        writeln!(file, "- {}", net.name)?;
        for seg in &net.wires {
            let layer = &design.tech.layer(seg.layer).name;
            writeln!(
                file,
                "  + ROUTED {} ( {} {} ) ( {} {} )",
                layer, seg.begin.x, seg.begin.y, seg.end.x, seg.end.y
            )?;
        }
        for via in &net.vias {
            let Some(def) = design.tech.vias.get(via.def) else {
                continue;
            };
            let layer = &design.tech.layer(def.cut).name;
            writeln!(
                file,
                "  + ROUTED {} ( {} {} ) {}",
                layer, via.point.x, via.point.y, def.name
            )?;
        }
        writeln!(file, "  ;")?;
    }
    writeln!(file, "END NETS")?;
    writeln!(file, "END DESIGN")?;
    file.flush()
}

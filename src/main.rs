use anyhow::Context;
use clap::Parser;
use topo3d::cli::Args;
use topo3d::experiment::{run, setup_logging};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose, args.quiet, args.log_level, args.log_file.as_deref())
        .context("failed to initialise logging")?;

    let artifacts = run(&args).context("optimization run failed")?;

    println!(
        "Slice z = {} (density > {}):",
        args.nelz / 2,
        args.disp_thres
    );
    print!("{}", artifacts.slice);
    println!("Results saved to {}", artifacts.experiment_dir.display());
    if let Some(stl) = &artifacts.stl {
        println!("STL written to {}", stl.display());
    }
    Ok(())
}

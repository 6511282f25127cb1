use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = bundlekit::cli::Cli::parse();
    bundlekit::init(cli.verbose);
    bundlekit::cli::run(cli)
}

use corvusdb::cli::{run, Cli};

fn main() {
    let cli = Cli::parse_args();
    std::process::exit(run(cli));
}

use lineage::{cli, snapshot, utils};

fn main() {
    // Parse cli and handle clap errors
    let options = cli::parse_from_args();

    lineage::init_logger(Some(options.log_level()));

    match snapshot::run(&options) {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            utils::report_error(&e);
            std::process::exit(1);
        }
    }
}

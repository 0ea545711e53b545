use warden::cli::{print_error, Cli};

fn main() {
    if let Err(e) = Cli::run() {
        print_error(&e.to_string());
        std::process::exit(1);
    }
}

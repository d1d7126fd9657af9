//! The main entrypoint for efibootctl, which just performs global initialization, and then
//! calls out into the library.

fn main() {
    efiboot_utils::initialize_tracing();
    tracing::trace!("starting {}", efiboot_utils::NAME);
    efiboot_utils::run_main(|| efiboot_lib::cli::run_from_iter(std::env::args_os()))
}

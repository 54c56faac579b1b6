use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("linkwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: linkwire");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "rustc: {}",
        option_env!("RUSTC_VERSION").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "features: client={}, async={}, cli=true",
        cfg!(feature = "client"),
        cfg!(feature = "async")
    );
    println!(
        "wire: max_frame_size={} header_size={}",
        linkwire_frame::MAX_FRAME_SIZE,
        linkwire_frame::HEADER_SIZE
    );

    Ok(SUCCESS)
}

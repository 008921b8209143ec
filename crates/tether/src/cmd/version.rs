use tether_frame::{
    ByteOrder, DEFAULT_MAX_PACKET_SIZE, HEADER_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE,
};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("tether {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: tether");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("TETHER_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "build_profile: {}",
        option_env!("TETHER_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("native_byte_order: {}", ByteOrder::native());
    println!("carriers: tcp, shm");
    println!("header_size: {HEADER_SIZE}");
    println!(
        "max_packet_size: default={DEFAULT_MAX_PACKET_SIZE}, \
         range={MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}"
    );

    Ok(SUCCESS)
}

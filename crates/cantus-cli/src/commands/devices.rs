//! Audio device listing command.

use cantus_io::{default_output_device, list_devices};
use clap::Args;

#[derive(Args)]
pub struct DevicesArgs {
    /// Only show the default output device
    #[arg(long)]
    default: bool,
}

pub fn run(args: DevicesArgs) -> anyhow::Result<()> {
    let default = default_output_device()?;

    if args.default {
        match default {
            Some(device) => println!(
                "{} ({} Hz, {} ch)",
                device.name, device.default_sample_rate, device.default_channels
            ),
            None => println!("No default output device."),
        }
        return Ok(());
    }

    let devices = list_devices()?;
    if devices.is_empty() {
        println!("No audio output devices found.");
        return Ok(());
    }

    println!("Output Devices");
    println!("==============\n");
    let default_name = default.map(|d| d.name);
    for (idx, device) in devices.iter().enumerate() {
        let marker = if default_name.as_deref() == Some(device.name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!(
            "  [{}] {} ({} Hz, {} ch){}",
            idx, device.name, device.default_sample_rate, device.default_channels, marker
        );
    }
    println!();
    println!("Tip: pass a partial name with --output:");
    println!("  cantus play --output \"{}\"", devices[0].name);
    Ok(())
}

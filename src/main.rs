// Copyright 2026 the crabby-heif authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use clap::Subcommand;

use crabby_heif::decoder::Decoder;
use crabby_heif::encoder::Encoder;
use crabby_heif::image::Image;
use crabby_heif::utils::reader::png::PngReader;
use crabby_heif::utils::reader::y4m::Y4MReader;
use crabby_heif::utils::reader::Reader;
use crabby_heif::utils::writer::png::PngWriter;
use crabby_heif::utils::writer::y4m::Y4MWriter;
use crabby_heif::utils::writer::Writer;
use crabby_heif::*;

use std::fs::File;
use std::io::Write as _;
use std::process::ExitCode;

fn usage_error<T>(message: String) -> HeifResult<T> {
    Err(HeifError {
        kind: ErrorKind::UsageError,
        sub_kind: SubErrorKind::Unspecified,
        message,
    })
}

fn unsupported<T>(sub_kind: SubErrorKind, message: String) -> HeifResult<T> {
    Err(HeifError {
        kind: ErrorKind::UnsupportedFeature,
        sub_kind,
        message,
    })
}

fn io_error(message: String) -> HeifError {
    HeifError {
        kind: ErrorKind::InputDoesNotExist,
        sub_kind: SubErrorKind::Unspecified,
        message,
    }
}

const EXIT_USAGE: u8 = 1;
const EXIT_UNSUPPORTED: u8 = 2;
const EXIT_INVALID_INPUT: u8 = 3;
const EXIT_IO: u8 = 4;

#[derive(Parser)]
#[command(name = "crabbyheif", about = "HEIF/HEIC/AVIF container tool")]
struct CommandLineArgs {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a y4m or png input into a HEIF file
    Encode {
        input_file: String,
        output_file: String,
        /// Quality in 0..=100
        #[arg(short, long, default_value = "90")]
        quality: u32,
        /// Lossless encoding
        #[arg(short = 'L', long)]
        lossless: bool,
        /// Codec specific parameter as name=value
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
        /// Encoder to use
        #[arg(short = 'e', long)]
        encoder: Option<String>,
        /// nclx matrix coefficients
        #[arg(long)]
        matrix: Option<u16>,
        /// nclx colour primaries
        #[arg(long)]
        primaries: Option<u16>,
        /// nclx transfer characteristics
        #[arg(long)]
        transfer: Option<u16>,
        /// Attach a thumbnail whose longest edge is at most this many pixels
        #[arg(long)]
        thumb: Option<u32>,
        /// Drop the alpha channel
        #[arg(long)]
        no_alpha: bool,
    },
    /// Decode the primary image of a HEIF file
    Decode {
        input_file: String,
        output_file: String,
        /// Write a PNG file
        #[arg(long)]
        png: bool,
        /// Write a JPEG file
        #[arg(long)]
        jpeg: bool,
        /// Also decode auxiliary images
        #[arg(long)]
        with_aux: bool,
        /// Colour conversion mode
        #[arg(short = 'C', long)]
        color_conversion: Option<String>,
        /// Output quality (JPEG only)
        #[arg(long)]
        quality: Option<u32>,
    },
    /// Dump the top-level metadata of a HEIF file
    Info { input_file: String },
}

fn exit_code_of(err: &HeifError) -> u8 {
    match err.kind {
        ErrorKind::UsageError => EXIT_USAGE,
        ErrorKind::UnsupportedFiletype
        | ErrorKind::UnsupportedFeature
        | ErrorKind::DecoderPluginError
        | ErrorKind::EncoderPluginError
        | ErrorKind::PluginLoadingError => EXIT_UNSUPPORTED,
        ErrorKind::InputDoesNotExist => EXIT_IO,
        _ => EXIT_INVALID_INPUT,
    }
}

fn parse_input(input_file: &str) -> HeifResult<Decoder> {
    let mut decoder = Decoder::default();
    decoder.set_io_file(input_file)?;
    decoder.parse()?;
    Ok(decoder)
}

fn info(input_file: &str) -> HeifResult<()> {
    let mut decoder = parse_input(input_file)?;
    print!("{}", decoder.dump()?);
    let primary_item_id = decoder.primary_item_id()?;
    println!("primary item: {primary_item_id}");
    for item_id in decoder.item_ids()? {
        let item = decoder.item(item_id)?;
        println!(
            "item {}: {:?} {}x{}{}",
            item_id,
            item.item_type,
            item.width,
            item.height,
            if item.hidden { " (hidden)" } else { "" }
        );
    }
    if let Some(exif) = decoder.exif(None)? {
        println!("exif: {} bytes", exif.len());
    }
    if let Some(xmp) = decoder.xmp(None)? {
        println!("xmp: {} bytes", xmp.len());
    }
    Ok(())
}

fn decode(
    input_file: &str,
    output_file: &str,
    png: bool,
    jpeg: bool,
    with_aux: bool,
    color_conversion: Option<String>,
) -> HeifResult<()> {
    if jpeg {
        return unsupported(
            SubErrorKind::Unspecified,
            "JPEG output requires an external encoder".into(),
        );
    }
    match color_conversion.as_deref() {
        None | Some("passthrough") => {}
        Some(mode) => {
            return unsupported(
                SubErrorKind::UnsupportedColorConversion,
                format!("colour conversion mode {mode}"),
            )
        }
    }
    let mut decoder = parse_input(input_file)?;
    let image = decoder.decode()?;
    if with_aux {
        for item_id in decoder.item_ids()? {
            if let Some(role) = decoder.auxiliary_role_of(item_id)? {
                println!("auxiliary item {item_id}: {role}");
                let _ = decoder.decode_item(item_id)?;
            }
        }
    }
    let mut file = File::create(output_file)
        .map_err(|_| io_error(format!("cannot create {output_file}")))?;
    let use_png = png || output_file.ends_with(".png");
    if use_png {
        PngWriter.write_frame(&mut file, &image)?;
    } else {
        Y4MWriter::default().write_frame(&mut file, &image)?;
    }
    file.flush().map_err(|_| io_error("write failed".into()))?;
    println!("wrote {output_file}");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn encode(
    input_file: &str,
    output_file: &str,
    encoder_id: Option<String>,
    params: &[String],
    quality: u32,
    lossless: bool,
    nclx: (Option<u16>, Option<u16>, Option<u16>),
    thumb: Option<u32>,
    no_alpha: bool,
) -> HeifResult<()> {
    match encoder_id.as_deref() {
        None | Some("uncompressed") => {}
        Some(id) => {
            return unsupported(
                SubErrorKind::UnsupportedCodec,
                format!("encoder {id} is not built in"),
            )
        }
    }
    for param in params {
        if !param.contains('=') {
            return usage_error(format!("invalid -p parameter {param:?}"));
        }
        // Codec specific parameters only apply to plugin encoders.
        log::warn!("ignoring codec specific parameter {param:?}");
    }
    if quality > 100 {
        return usage_error(format!("quality {quality} is out of range"));
    }
    let mut image = if input_file.ends_with(".png") {
        PngReader.read_frame(input_file)?
    } else {
        Y4MReader.read_frame(input_file)?
    };
    if no_alpha && image.yuv_format == PixelFormat::InterleavedRgba {
        // Repack without the alpha channel.
        let mut opaque = Image::create(image.width, image.height, image.depth, PixelFormat::InterleavedRgb);
        opaque.allocate_planes(false)?;
        for y in 0..image.height {
            let source: Vec<u8> = image
                .row(crabby_heif::image::Plane::Y, y)?
                .chunks_exact(4)
                .flat_map(|rgba| [rgba[0], rgba[1], rgba[2]])
                .collect();
            opaque
                .row_mut(crabby_heif::image::Plane::Y, y)?
                .copy_from_slice(&source);
        }
        image = opaque;
    }
    if let (Some(matrix), primaries, transfer) = (nclx.0, nclx.1, nclx.2) {
        image.matrix_coefficients = matrix.into();
        image.color_primaries = primaries.unwrap_or(2).into();
        image.transfer_characteristics = transfer.unwrap_or(2).into();
    } else {
        if let Some(primaries) = nclx.1 {
            image.color_primaries = primaries.into();
        }
        if let Some(transfer) = nclx.2 {
            image.transfer_characteristics = transfer.into();
        }
    }
    let mut encoder = Encoder::create();
    encoder.settings.quality = quality;
    encoder.settings.lossless = lossless;
    let image_item = encoder.add_image(&image)?;
    if let Some(thumb) = thumb {
        if thumb == 0 {
            return usage_error("--thumb must be positive".into());
        }
        if thumb < std::cmp::max(image.width, image.height) {
            let scale = std::cmp::max(image.width, image.height) as u64;
            let thumb_width = (u64::from(image.width) * u64::from(thumb) / scale) as u32;
            let thumb_height = (u64::from(image.height) * u64::from(thumb) / scale) as u32;
            let thumbnail = image.scale_nearest(
                std::cmp::max(1, thumb_width),
                std::cmp::max(1, thumb_height),
            )?;
            let thumbnail_item = encoder.add_image(&thumbnail)?;
            encoder.set_thumbnail(thumbnail_item, image_item)?;
        }
    }
    let data = encoder.write()?;
    std::fs::write(output_file, data)
        .map_err(|_| io_error(format!("cannot write {output_file}")))?;
    println!("wrote {output_file}");
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    crabby_heif::init();
    let args = CommandLineArgs::parse();
    let result = match args.command {
        Commands::Info { input_file } => info(&input_file),
        Commands::Decode {
            input_file,
            output_file,
            png,
            jpeg,
            with_aux,
            color_conversion,
            quality: _,
        } => decode(&input_file, &output_file, png, jpeg, with_aux, color_conversion),
        Commands::Encode {
            input_file,
            output_file,
            quality,
            lossless,
            params,
            encoder,
            matrix,
            primaries,
            transfer,
            thumb,
            no_alpha,
        } => encode(
            &input_file,
            &output_file,
            encoder,
            &params,
            quality,
            lossless,
            (matrix, primaries, transfer),
            thumb,
            no_alpha,
        ),
    };
    crabby_heif::deinit();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code_of(&err))
        }
    }
}

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

pub mod mask;
pub mod uncompressed;

use crate::image::Image;
use crate::parser::mp4box::CodecConfiguration;
use crate::parser::mp4box::ComponentDefinitions;
use crate::*;

use std::num::NonZero;
use std::sync::Arc;
use std::sync::RwLock;

/// Everything a codec needs to know about the item it is asked to decode.
#[derive(Clone, Default)]
pub struct DecoderConfig {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub codec_config: Option<CodecConfiguration>,
    pub component_definitions: Option<ComponentDefinitions>,
    pub max_threads: u32,
    pub image_size_limit: Option<NonZero<u32>>,
    pub image_dimension_limit: Option<NonZero<u32>>,
    pub allow_rrggbb_48bit: bool,
}

/// A decoder instance created by a [DecoderPlugin]. Instances must be
/// thread-safe but are never shared across threads.
pub trait Decoder: Send {
    /// Appends coded bytes. May be called multiple times before
    /// [Decoder::decode_image].
    fn push_data(&mut self, data: &[u8]) -> HeifResult<()>;
    /// Decodes the pushed bytes into a pixel image.
    fn decode_image(&mut self) -> HeifResult<Image>;
    /// In strict mode, decoders should fail on any spec deviation instead
    /// of recovering silently.
    fn set_strict_decoding(&mut self, strict: bool);
    // Destruction must be implemented using Drop.
}

/// A codec registered with the process-wide plugin registry.
pub trait DecoderPlugin: Send + Sync {
    fn name(&self) -> &'static str;
    /// Plugins with a higher priority win when several support a format.
    fn priority(&self) -> i32;
    fn supports_format(&self, format: CompressionFormat) -> bool;
    fn new_decoder(&self, config: &DecoderConfig) -> HeifResult<Box<dyn Decoder>>;
}

// The registry is read-mostly: it is populated during init() and read
// (snapshotted) at parse time. Registration after the first parse is legal
// but does not affect in-flight decoders.
static PLUGINS: RwLock<Vec<Arc<dyn DecoderPlugin>>> = RwLock::new(Vec::new());

/// Registers a decoder plugin. Plugins registered here take part in format
/// dispatch for every subsequent parse. Registering a plugin with the same
/// name as an existing one replaces it.
pub fn register_decoder_plugin(plugin: Arc<dyn DecoderPlugin>) {
    let mut plugins = PLUGINS.write().unwrap();
    plugins.retain(|existing| existing.name() != plugin.name());
    plugins.push(plugin);
}

pub(crate) fn init_default_plugins() {
    {
        let plugins = PLUGINS.read().unwrap();
        if !plugins.is_empty() {
            return;
        }
    }
    register_decoder_plugin(Arc::new(uncompressed::UncompressedCodec));
    register_decoder_plugin(Arc::new(mask::MaskCodec));
    for directory in plugin_directories() {
        // Dynamically loaded codecs are provided through the C glue layer;
        // this library only dispatches to statically registered plugins.
        log::warn!(
            "ignoring HEIF_PLUGIN_PATH entry {}: dynamic plugin loading is not available",
            directory.display()
        );
    }
}

pub(crate) fn clear_plugins() {
    PLUGINS.write().unwrap().clear();
}

/// The plugin set in effect right now. Decoders snapshot this at parse time
/// so that late registration does not affect in-flight decodes.
pub(crate) fn snapshot() -> Vec<Arc<dyn DecoderPlugin>> {
    PLUGINS.read().unwrap().clone()
}

/// Picks the highest-priority plugin supporting the given format from a
/// snapshot.
pub(crate) fn select_plugin(
    plugins: &[Arc<dyn DecoderPlugin>],
    format: CompressionFormat,
) -> Option<Arc<dyn DecoderPlugin>> {
    plugins
        .iter()
        .filter(|plugin| plugin.supports_format(format))
        .max_by_key(|plugin| plugin.priority())
        .cloned()
}

/// Directories listed in the HEIF_PLUGIN_PATH environment variable. This is
/// the only environment input of the library.
pub fn plugin_directories() -> Vec<std::path::PathBuf> {
    match std::env::var("HEIF_PLUGIN_PATH") {
        Ok(value) => value
            .split(':')
            .filter(|entry| !entry.is_empty())
            .map(std::path::PathBuf::from)
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePlugin {
        name: &'static str,
        priority: i32,
    }

    impl DecoderPlugin for FakePlugin {
        fn name(&self) -> &'static str {
            self.name
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn supports_format(&self, format: CompressionFormat) -> bool {
            format == CompressionFormat::Av1
        }
        fn new_decoder(&self, _config: &DecoderConfig) -> HeifResult<Box<dyn Decoder>> {
            HeifError::decoder_plugin("not a real codec")
        }
    }

    #[test]
    fn highest_priority_wins() {
        let plugins: Vec<Arc<dyn DecoderPlugin>> = vec![
            Arc::new(FakePlugin {
                name: "low",
                priority: 10,
            }),
            Arc::new(FakePlugin {
                name: "high",
                priority: 90,
            }),
        ];
        let selected = select_plugin(&plugins, CompressionFormat::Av1).unwrap();
        assert_eq!(selected.name(), "high");
        assert!(select_plugin(&plugins, CompressionFormat::Hevc).is_none());
    }
}

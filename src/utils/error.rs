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

use crate::*;

// To be used instead of building HeifError values at call sites, in order to
// debug unexpected Err propagations as early as possible in the call stack.
#[allow(dead_code)]
impl HeifError {
    fn on_error() {
        // Manually add a breakpoint here, or uncomment the following to
        // print the stack trace.
        // println!("{}", std::backtrace::Backtrace::force_capture());
    }

    pub(crate) fn new(kind: ErrorKind, sub_kind: SubErrorKind, message: String) -> HeifError {
        HeifError::on_error();
        HeifError {
            kind,
            sub_kind,
            message,
        }
    }

    pub(crate) fn invalid_input<T, O>(sub_kind: SubErrorKind, message: O) -> HeifResult<T>
    where
        O: std::fmt::Display,
    {
        Err(HeifError::new(
            ErrorKind::InvalidInput,
            sub_kind,
            message.to_string(),
        ))
    }

    pub(crate) fn end_of_data<T>() -> HeifResult<T> {
        Err(HeifError::new(
            ErrorKind::InvalidInput,
            SubErrorKind::EndOfData,
            String::new(),
        ))
    }

    pub(crate) fn waiting_on_io<T>() -> HeifResult<T> {
        Err(HeifError::new(
            ErrorKind::InvalidInput,
            SubErrorKind::WaitingOnIo,
            String::new(),
        ))
    }

    pub(crate) fn security_limit<T, O>(message: O) -> HeifResult<T>
    where
        O: std::fmt::Display,
    {
        Err(HeifError::new(
            ErrorKind::InvalidInput,
            SubErrorKind::SecurityLimitExceeded,
            message.to_string(),
        ))
    }

    pub(crate) fn allocation_limit<T, O>(message: O) -> HeifResult<T>
    where
        O: std::fmt::Display,
    {
        Err(HeifError::new(
            ErrorKind::MemoryAllocationError,
            SubErrorKind::SecurityLimitExceeded,
            message.to_string(),
        ))
    }

    pub(crate) fn overflow<T>() -> HeifResult<T> {
        Err(HeifError::new(
            ErrorKind::InvalidInput,
            SubErrorKind::Unspecified,
            "arithmetic overflow".into(),
        ))
    }

    pub(crate) fn unsupported_feature<T, O>(sub_kind: SubErrorKind, message: O) -> HeifResult<T>
    where
        O: std::fmt::Display,
    {
        Err(HeifError::new(
            ErrorKind::UnsupportedFeature,
            sub_kind,
            message.to_string(),
        ))
    }

    pub(crate) fn unsupported_filetype<T, O>(message: O) -> HeifResult<T>
    where
        O: std::fmt::Display,
    {
        Err(HeifError::new(
            ErrorKind::UnsupportedFiletype,
            SubErrorKind::Unspecified,
            message.to_string(),
        ))
    }

    pub(crate) fn usage<T, O>(message: O) -> HeifResult<T>
    where
        O: std::fmt::Display,
    {
        Err(HeifError::new(
            ErrorKind::UsageError,
            SubErrorKind::Unspecified,
            message.to_string(),
        ))
    }

    pub(crate) fn input_does_not_exist<T, O>(message: O) -> HeifResult<T>
    where
        O: std::fmt::Display,
    {
        Err(HeifError::new(
            ErrorKind::InputDoesNotExist,
            SubErrorKind::Unspecified,
            message.to_string(),
        ))
    }

    pub(crate) fn decoder_plugin<T, O>(message: O) -> HeifResult<T>
    where
        O: std::fmt::Display,
    {
        Err(HeifError::new(
            ErrorKind::DecoderPluginError,
            SubErrorKind::Unspecified,
            message.to_string(),
        ))
    }

    pub(crate) fn encoder_plugin<T, O>(message: O) -> HeifResult<T>
    where
        O: std::fmt::Display,
    {
        Err(HeifError::new(
            ErrorKind::EncoderPluginError,
            SubErrorKind::Unspecified,
            message.to_string(),
        ))
    }

    pub(crate) fn plugin_loading<T, O>(message: O) -> HeifResult<T>
    where
        O: std::fmt::Display,
    {
        Err(HeifError::new(
            ErrorKind::PluginLoadingError,
            SubErrorKind::Unspecified,
            message.to_string(),
        ))
    }

    pub(crate) fn no_color_profile<T>() -> HeifResult<T> {
        Err(HeifError::new(
            ErrorKind::ColorProfileDoesNotExist,
            SubErrorKind::Unspecified,
            String::new(),
        ))
    }

    pub(crate) fn canceled<T>() -> HeifResult<T> {
        Err(HeifError::new(
            ErrorKind::Canceled,
            SubErrorKind::Unspecified,
            String::new(),
        ))
    }

    pub(crate) fn out_of_memory<T>() -> HeifResult<T> {
        Err(HeifError::new(
            ErrorKind::MemoryAllocationError,
            SubErrorKind::Unspecified,
            String::new(),
        ))
    }

    pub fn is_ok(&self) -> bool {
        self.kind == ErrorKind::Ok
    }
}

#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Progress-bar decorator for [`taskmill`] result streams.
//!
//! A passive wrapper: it reads the stream's advertised length, draws an
//! [`indicatif`] bar (or a spinner when the length is unknown), and forwards
//! items untouched.

use indicatif::{ProgressBar, ProgressBarIter, ProgressStyle};
use taskmill::ResultStream;

const BAR_TEMPLATE: &str = "{msg} {wide_bar} {pos}/{len} ({eta})";

/// Display options for [`attach_with`].
#[derive(Debug, Clone, Default)]
pub struct ProgressOptions {
    /// Message shown ahead of the bar.
    pub message: String,
    /// Draw nothing; useful in test suites.
    pub hidden: bool,
}

/// Wrap a result stream in a progress bar sized from its advertised length.
pub fn attach<'pool, In, Out, I>(
    stream: ResultStream<'pool, In, Out, I>,
) -> ProgressBarIter<ResultStream<'pool, In, Out, I>>
where
    I: Iterator<Item = In>,
{
    attach_with(stream, ProgressOptions::default())
}

/// [`attach`] with explicit display options.
pub fn attach_with<'pool, In, Out, I>(
    stream: ResultStream<'pool, In, Out, I>,
    options: ProgressOptions,
) -> ProgressBarIter<ResultStream<'pool, In, Out, I>>
where
    I: Iterator<Item = In>,
{
    let bar = if options.hidden {
        ProgressBar::hidden()
    } else {
        match stream.expected_len() {
            Some(len) => ProgressBar::new(len as u64),
            None => ProgressBar::new_spinner(),
        }
    };
    if !options.message.is_empty() {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(options.message);
    }
    bar.wrap_iter(stream)
}

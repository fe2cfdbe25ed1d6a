//   Copyright 2025 The Tether Project
//   SPDX-License-Identifier: BSD-3-Clause

/// Collect `take` items from a stream, or panic after `timeout` elapses while
/// waiting for the next one. Omitting `take` collects until the stream closes.
/// Requires a tokio runtime.
#[macro_export]
macro_rules! collect_stream {
    ($stream:expr, take=$take:expr, timeout=$timeout:expr $(,)?) => {{
        use futures::StreamExt;
        use tokio::time;

        // Evaluate $stream once, NOT in the loop
        let stream = &mut $stream;

        let mut items = Vec::new();
        loop {
            if let Some(item) = time::timeout($timeout, stream.next()).await.unwrap_or_else(|_| {
                panic!(
                    "Timeout before stream could collect {} item(s). Got {} item(s).",
                    $take,
                    items.len()
                )
            }) {
                items.push(item);
                if items.len() == $take {
                    break items;
                }
            } else {
                break items;
            }
        }
    }};
    ($stream:expr, timeout=$timeout:expr $(,)?) => {{
        use futures::StreamExt;
        use tokio::time;

        let mut items = Vec::new();
        while let Some(item) = time::timeout($timeout, $stream.next())
            .await
            .unwrap_or_else(|_| panic!("Timeout before stream was closed. Got {} items.", items.len()))
        {
            items.push(item);
        }
        items
    }};
}

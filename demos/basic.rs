//! Basic usage examples for flowtube
//!
//! Run with: cargo run --example basic

use std::time::Duration;

use flowtube::prelude::*;

/// Splits lines into words, and counts the lines it saw when the flow stops.
struct WordSplitter {
    lines: usize,
}

impl Processor for WordSplitter {
    type Input = String;
    type Output = String;

    fn input_kind(&self) -> Option<Kind> {
        Some(Kind::new("text").refine("lines"))
    }

    fn output_kind(&self) -> Option<Kind> {
        Some(Kind::new("text").refine("words"))
    }

    fn received(&mut self, line: Self::Input) -> Produced<Self::Output> {
        self.lines += 1;
        let words: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
        Ok(Some(Production::values(words)))
    }

    fn stopped(&mut self, reason: &StopReason) -> Produced<Self::Output> {
        let summary = format!("<{} lines, {}>", self.lines, reason);
        Ok(Some(Production::once(summary)))
    }
}

/// Example 1: Simple number processing
fn simple_example() -> Result<()> {
    println!("=== Simple Number Processing ===");

    let (producer, consumer) = wrap(NoOpProcessor::<i64>::new());
    producer.flow_to(Some(PrintSink::<i64>::with_prefix("Number")))?;
    IteratorSource::new(1..11).flow_to(Some(consumer))?;

    println!();
    Ok(())
}

/// Example 2: Transform and filter
fn transform_filter_example() -> Result<()> {
    println!("=== Transform and Filter ===");

    let (multiples, multiples_in) = wrap(FilterProcessor::new(|x: &i64| x % 3 == 0));
    let (_squared, squared_in) = Stage::new(MapProcessor::new(|x: i64| x * x))
        .name("square")
        .build();

    let tail = multiples
        .flow_to(Some(squared_in))?
        .producer::<i64>()
        .ok_or_else(|| Error::custom("chain ended early"))?;
    tail.flow_to(Some(PrintSink::<i64>::with_prefix("Square of multiple of 3")))?;
    IteratorSource::new(1..21).flow_to(Some(multiples_in))?;

    println!();
    Ok(())
}

/// Example 3: Batch processing
fn batch_example() -> Result<()> {
    println!("=== Batch Processing ===");

    let (batches, batcher) = wrap(BatchProcessor::new(4));
    batches.flow_to(Some(FnSink::new(|batch: Vec<i64>| println!("Batch: {:?}", batch))))?;
    IteratorSource::new(1..16).flow_to(Some(batcher))?;

    println!();
    Ok(())
}

/// Example 4: Kinds and a processor with its own stop output
fn word_example() -> Result<()> {
    println!("=== Word Splitting ===");

    let (words, splitter) = wrap(WordSplitter { lines: 0 });
    let sink = CollectSink::new();
    words.flow_to(Some(sink.consumer()))?;

    let lines = vec![
        "the quick brown fox".to_string(),
        "jumps over".to_string(),
        "the lazy dog".to_string(),
    ];
    let text = Kind::new("text");
    let source = IteratorSource::with_kind(lines.clone(), text.refine("lines"));
    source.flow_to(Some(splitter))?;
    println!("Words: {:?}", sink.items());

    // Plain text is too general for a stage that expects lines.
    let (_words, strict) = wrap(WordSplitter { lines: 0 });
    match IteratorSource::with_kind(lines, text).flow_to(Some(strict)) {
        Ok(_) => println!("Unexpectedly attached"),
        Err(e) => println!("Refused to attach: {}", e),
    }

    println!();
    Ok(())
}

/// Example 5: Pausing from the consumer side
fn pause_example() -> Result<()> {
    println!("=== Pausing ===");

    let (producer, consumer) = wrap(MapProcessor::new(|x: u32| x * 100));
    let sink = CollectSink::new();
    producer.flow_to(Some(sink.consumer()))?;

    let mut first = sink.pause().ok_or_else(|| Error::custom("no producer attached"))?;
    let mut second = sink.pause().ok_or_else(|| Error::custom("no producer attached"))?;
    IteratorSource::new(vec![1, 2, 3]).flow_to(Some(consumer))?;
    println!("Paused: {} item(s) delivered", sink.len());

    first.resume();
    println!("One token released: {} item(s) delivered", sink.len());
    second.resume();
    println!("Both released: {:?}", sink.items());

    println!();
    Ok(())
}

/// Example 6: Error handling
fn error_handling_example() -> Result<()> {
    println!("=== Error Handling ===");

    let reporter = CollectReporter::new();
    let (producer, consumer) = Stage::new(processor_from_fn(|x: i64| {
        if x == 5 {
            Err(Error::custom("Simulated error at item 5"))
        } else {
            Ok(Some(Production::once(x)))
        }
    }))
    .name("fail-at-five")
    .reporter(reporter.clone())
    .build();

    let sink = CollectSink::new();
    producer.flow_to(Some(sink.consumer()))?;
    IteratorSource::new(1..11).flow_to(Some(consumer))?;

    println!("Delivered before the fault: {:?}", sink.items());
    if let Some(reason) = sink.stop_reason() {
        println!("Flow stopped: {}", reason);
    }
    for (error, context) in reporter.reports() {
        println!("Reported: {} ({})", error, context);
    }

    println!();
    Ok(())
}

/// Example 7: Asynchronous values
async fn async_example() -> Result<()> {
    println!("=== Asynchronous Values ===");

    let (producer, consumer) = Stage::new(ThenProcessor::new(|x: u64| async move {
        // Later items resolve sooner, but arrive in order anyway.
        tokio::time::sleep(Duration::from_millis(50 - x * 10)).await;
        Ok::<_, Error>(x * 10)
    }))
    .name("slow-tens")
    .build();

    let sink = CollectSink::new();
    producer.flow_to(Some(sink.consumer()))?;
    IteratorSource::new(1..5).flow_to(Some(consumer))?;

    while !sink.is_stopped() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    println!("Results: {:?}", sink.items());

    println!();
    Ok(())
}

/// Example 8: Streams as sources
async fn stream_example() -> Result<()> {
    println!("=== Stream Source ===");

    let (producer, consumer) = wrap(MapProcessor::new(|c: char| c.to_ascii_uppercase()));
    let sink = CollectSink::new();
    producer.flow_to(Some(sink.consumer()))?;

    let source = StreamSource::new(tokio_stream::iter("flowtube".chars()));
    source.flow_to(Some(consumer))?;

    while !sink.is_stopped() {
        tokio::task::yield_now().await;
    }
    println!("Shouted: {}", sink.items().into_iter().collect::<String>());

    println!();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    println!("flowtube {} examples\n", flowtube::VERSION);

    simple_example()?;
    transform_filter_example()?;
    batch_example()?;
    word_example()?;
    pause_example()?;
    error_handling_example()?;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            async_example().await?;
            stream_example().await
        })
        .await?;

    println!("All examples completed successfully!");
    Ok(())
}

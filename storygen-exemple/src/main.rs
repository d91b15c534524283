use rand::SeedableRng;
use rand::rngs::StdRng;

use storygen_core::model::generation_input::GenerationInput;
use storygen_core::model::generator::{Fragment, StoryStream};
use storygen_core::model::trigram::TrigramModel;
use storygen_core::tokenizer::bpe::BpeTokenizer;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Train the tokenizer on the raw corpus (one story per line),
    // or reload the .tok artifact if a previous run already built it
    let tokenizer = BpeTokenizer::from_corpus("./data/stories.txt", 1500)?;

    // Same lazy pattern for the language model (.lm artifact)
    let model = TrigramModel::from_corpus("./data/stories.txt", &tokenizer)?;

    // from_corpus always registers the reserved markers before saving
    let specials = tokenizer.specials().ok_or("Reserved markers missing")?;

    // Default bounds: at most 800 tokens, at least 600
    let mut input = GenerationInput::new(specials);

    // Requests below the floors are clamped up, so this still runs
    // with a ceiling of 800
    input.set_max_length(600);

    // The prefix is encoded with the same tokenizer the model was
    // trained with
    let prefix = "ایک دفعہ کا ذکر ہے";
    let prefix_ids = tokenizer.encode(prefix);

    // Stream fragments as they are produced; a fixed seed makes the
    // run reproducible
    let rng = StdRng::seed_from_u64(2024);

    let mut story = String::from(prefix);
    story.push(' ');
    print!("{story}");

    for fragment in StoryStream::new(&model, &tokenizer, &prefix_ids, input, rng) {
        match fragment? {
            Fragment::Token(id) => {
                let piece = tokenizer.decode(&[id]);
                print!("{piece}");
                story.push_str(&piece);
            }
            Fragment::ParagraphBreak => {
                println!();
                println!();
                story.push_str("\n\n");
            }
        }
    }

    println!();
    println!("Generated {} characters", story.chars().count());

    Ok(())
}

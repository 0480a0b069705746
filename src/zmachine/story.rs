use std::io::Read;

use super::addressing::ZPC;
use super::dictionary::ZDictionary;
use super::handle::new_handle;
use super::memory::ZMemory;
use super::objects::ZObjectTable;
use super::processor::ZProcessor;
use super::result::Result;
use super::stack::ZStack;
use super::traits::{ZInput, ZOutput};
use super::variables::ZVariables;

// Load a story from rdr and wire up a ready-to-run machine around it.
// Fails, without running anything, if the image does not validate.
pub fn new_story_processor<T, I, O>(rdr: &mut T, input: I, output: O) -> Result<ZProcessor<I, O>>
where
    T: Read,
    I: ZInput,
    O: ZOutput,
{
    let (story_h, header) = ZMemory::new(rdr)?;
    let pc = ZPC::new(&story_h, header.start_pc()?);
    let stack_h = new_handle(ZStack::new());
    let variables = ZVariables::new(header.global_location()?, story_h.clone(), stack_h.clone());
    let objects = ZObjectTable::new(&story_h, &header)?;
    let dictionary = ZDictionary::new(&story_h, header.dictionary_location()?)?;

    ZProcessor::new(
        story_h, header, pc, stack_h, variables, objects, dictionary, input, output,
    )
}

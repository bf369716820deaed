//! Given steps for task dispatch BDD scenarios.

use super::world::DispatchWorld;
use rstest_bdd_macros::given;

#[given("a dispatcher with a working queue")]
fn working_queue(world: &mut DispatchWorld) -> Result<(), eyre::Report> {
    world.queue.set_available(true)?;
    Ok(())
}

#[given("a dispatcher with an unavailable queue")]
fn unavailable_queue(world: &mut DispatchWorld) -> Result<(), eyre::Report> {
    world.queue.set_available(false)?;
    Ok(())
}

/// A single sounding pitch. Times are in quarter notes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub pitch: i32,
    pub start: f64,
    pub duration: f64,
}

impl NoteEvent {
    pub fn new(pitch: i32, start: f64, duration: f64) -> Self {
        Self {
            pitch,
            start,
            duration,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

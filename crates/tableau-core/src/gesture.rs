//! Pointer gestures to shapes.
//!
//! Each drawing tool is a small state machine: a press starts a gesture,
//! moves while active produce previews, and a release commits the shape and
//! returns to idle. Moves while idle are ignored, so a finished gesture can
//! never leak trailing previews into the next one.

use crate::stream::{snapshot, Behavior, Event};
use parking_lot::Mutex;
use std::sync::Arc;
use tableau_protocol::{Geometry, Point};

/// A drawing tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Line,
    Rectangle,
    Ellipse,
    Dot,
    Polygon,
}

/// Stroke settings sampled at every pointer event.
#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    pub size: f64,
    pub color: String,
    pub fill: String,
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            size: 1.0,
            color: "#000000".to_string(),
            fill: "#ffffff".to_string(),
        }
    }
}

/// Pointer input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pointer {
    Press(Point),
    Move(Point),
    Release(Point),
    /// Confirm the cursor position as a polygon corner.
    Corner,
    /// The pointer left the canvas.
    Leave(Point),
}

/// What a gesture step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureOutput {
    /// Temporary shape to draw locally.
    Preview(Geometry),
    /// Finished shape to send with `addShape`.
    Commit(Geometry),
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Idle,
    Active {
        origin: Point,
        cursor: Point,
        points: Vec<Point>,
    },
}

/// One tool's gesture state.
#[derive(Debug, Clone)]
pub struct Gesture {
    tool: Tool,
    state: State,
}

impl Gesture {
    #[must_use]
    pub fn new(tool: Tool) -> Self {
        Self {
            tool,
            state: State::Idle,
        }
    }

    #[must_use]
    pub fn tool(&self) -> Tool {
        self.tool
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active { .. })
    }

    /// Advance the state machine by one pointer event.
    pub fn step(&mut self, pointer: Pointer, brush: &Brush) -> Option<GestureOutput> {
        let tool = self.tool;
        if !self.is_active() {
            if let Pointer::Press(p) = pointer {
                self.state = State::Active {
                    origin: p,
                    cursor: p,
                    points: vec![p],
                };
            }
            return None;
        }
        let State::Active {
            origin,
            cursor,
            points,
        } = &mut self.state
        else {
            return None;
        };

        match pointer {
            Pointer::Press(_) => None,
            Pointer::Move(p) => {
                *cursor = p;
                if tool == Tool::Dot {
                    points.push(p);
                }
                Some(GestureOutput::Preview(preview(tool, *origin, p, points, brush)))
            }
            Pointer::Corner if tool == Tool::Polygon => {
                points.push(*cursor);
                Some(GestureOutput::Preview(dot(points.clone(), brush)))
            }
            Pointer::Corner => None,
            Pointer::Leave(p) => match tool {
                Tool::Line | Tool::Ellipse => self.finish(p, brush),
                Tool::Rectangle => Some(GestureOutput::Preview(span(tool, *origin, p, brush))),
                Tool::Dot | Tool::Polygon => None,
            },
            Pointer::Release(p) => self.finish(p, brush),
        }
    }

    /// Commit the active gesture at `p` and return to idle.
    fn finish(&mut self, p: Point, brush: &Brush) -> Option<GestureOutput> {
        let State::Active {
            origin, mut points, ..
        } = std::mem::replace(&mut self.state, State::Idle)
        else {
            return None;
        };
        let shape = match self.tool {
            Tool::Line | Tool::Rectangle | Tool::Ellipse => span(self.tool, origin, p, brush),
            Tool::Dot => dot(points, brush),
            Tool::Polygon => {
                points.push(p);
                Geometry::Polygon {
                    corners: points,
                    size: brush.size,
                    color: brush.color.clone(),
                    fill: brush.fill.clone(),
                }
            }
        };
        Some(GestureOutput::Commit(shape))
    }

    /// Run a gesture over a pointer stream, sampling `brush` at every event.
    pub fn drive(
        tool: Tool,
        pointer: &Event<Pointer>,
        brush: &Behavior<Brush>,
    ) -> Event<GestureOutput> {
        let gesture = Arc::new(Mutex::new(Gesture::new(tool)));
        snapshot(pointer, brush).filter_map(move |(pointer, brush)| {
            gesture.lock().step(*pointer, brush)
        })
    }
}

fn preview(tool: Tool, origin: Point, cursor: Point, points: &[Point], brush: &Brush) -> Geometry {
    match tool {
        Tool::Line | Tool::Rectangle | Tool::Ellipse => span(tool, origin, cursor, brush),
        Tool::Dot => dot(points.to_vec(), brush),
        // Corners so far plus the cursor, drawn as an open stroke.
        Tool::Polygon => {
            let mut path = points.to_vec();
            path.push(cursor);
            dot(path, brush)
        }
    }
}

/// Two-point shapes.
fn span(tool: Tool, a: Point, b: Point, brush: &Brush) -> Geometry {
    let (w, h) = ((a.x - b.x).abs(), (a.y - b.y).abs());
    match tool {
        Tool::Line => Geometry::Line {
            x1: a.x,
            y1: a.y,
            x2: b.x,
            y2: b.y,
            size: brush.size,
            color: brush.color.clone(),
        },
        Tool::Ellipse => Geometry::Ellipse {
            x: (a.x + b.x) / 2.0,
            y: (a.y + b.y) / 2.0,
            w: w / 2.0,
            h: h / 2.0,
            size: brush.size,
            color: brush.color.clone(),
            fill: brush.fill.clone(),
        },
        // Corner snapped to the pixel centre.
        _ => Geometry::Rectangle {
            x: a.x.min(b.x) + 0.5,
            y: a.y.min(b.y) + 0.5,
            w,
            h,
            size: brush.size,
            color: brush.color.clone(),
            fill: brush.fill.clone(),
        },
    }
}

fn dot(points: Vec<Point>, brush: &Brush) -> Geometry {
    Geometry::Dot {
        points,
        size: brush.size,
        color: brush.color.clone(),
    }
}

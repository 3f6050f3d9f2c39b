mod assembly;
mod element;
mod weak_form;
